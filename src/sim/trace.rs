use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use log::warn;

use crate::timeq::Cycle;

/// One row of the event trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub cycle: Cycle,
    pub event: &'static str,
    pub unit: &'static str,
    pub id: usize,
    pub detail: String,
}

/// Buffered CSV sink, `cycle,event,unit,id,detail`. Flushed on drop.
pub struct TraceSink {
    writer: BufWriter<Box<dyn Write>>,
    rows: u64,
}

impl TraceSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("cannot create trace file {}", path.display()))?;
        Self::from_writer(Box::new(file))
    }

    pub fn from_writer(writer: Box<dyn Write>) -> anyhow::Result<Self> {
        let mut writer = BufWriter::new(writer);
        writeln!(writer, "cycle,event,unit,id,detail")?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn record(&mut self, event: TraceEvent) {
        let res = writeln!(
            self.writer,
            "{},{},{},{},{}",
            event.cycle,
            event.event,
            event.unit,
            event.id,
            event.detail.replace(',', ";")
        );
        match res {
            Ok(()) => self.rows += 1,
            Err(err) => warn!("dropping trace row: {}", err),
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl Drop for TraceSink {
    fn drop(&mut self) {
        if let Err(err) = self.writer.flush() {
            warn!("failed to flush trace: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rows_are_csv_and_flushed_on_drop() {
        let out = Shared::default();
        {
            let mut sink = TraceSink::from_writer(Box::new(out.clone())).unwrap();
            sink.record(TraceEvent {
                cycle: 3,
                event: "conflict",
                unit: "arbiter",
                id: 1,
                detail: "bank 2, requester 5".to_string(),
            });
            assert_eq!(1, sink.rows());
        }
        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert_eq!("cycle,event,unit,id,detail\n3,conflict,arbiter,1,bank 2; requester 5\n", text);
    }
}
