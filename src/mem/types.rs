use serde::Serialize;

pub type RequesterId = usize;
pub type TileId = usize;

/// Position of a core (and its mesh slice) on the 2D grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GridCoord {
    pub row: usize,
    pub col: usize,
}

impl GridCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Row-major mapping from a linear core id.
    pub fn from_linear(id: usize, width: usize) -> Self {
        Self {
            row: id / width,
            col: id % width,
        }
    }

    pub fn linear(&self, width: usize) -> usize {
        self.row * width + self.col
    }

    pub fn manhattan(&self, other: GridCoord) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

impl std::fmt::Display for GridCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Direction of a one-hop neighbor, as seen from the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Direction from `from` to an adjacent `to`, or `None` when they are not
    /// exactly one grid step apart.
    pub fn between(from: GridCoord, to: GridCoord) -> Option<Self> {
        if from.manhattan(to) != 1 {
            return None;
        }
        Some(if to.row < from.row {
            Self::North
        } else if to.row > from.row {
            Self::South
        } else if to.col > from.col {
            Self::East
        } else {
            Self::West
        })
    }

    pub fn index(self) -> usize {
        match self {
            Self::North => 0,
            Self::South => 1,
            Self::East => 2,
            Self::West => 3,
        }
    }
}

/// One thread's load or store for this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub requester_id: RequesterId,
    pub address: u64,
    pub is_write: bool,
    pub data: Option<u64>,
}

impl Request {
    pub fn load(requester_id: RequesterId, address: u64) -> Self {
        Self {
            requester_id,
            address,
            is_write: false,
            data: None,
        }
    }

    pub fn store(requester_id: RequesterId, address: u64, data: u64) -> Self {
        Self {
            requester_id,
            address,
            is_write: true,
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResponse {
    pub requester_id: RequesterId,
    pub address: u64,
    pub data: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbors_are_never_diagonal() {
        let origin = GridCoord::new(1, 1);
        assert_eq!(Some(Direction::North), Direction::between(origin, GridCoord::new(0, 1)));
        assert_eq!(Some(Direction::South), Direction::between(origin, GridCoord::new(2, 1)));
        assert_eq!(Some(Direction::East), Direction::between(origin, GridCoord::new(1, 2)));
        assert_eq!(Some(Direction::West), Direction::between(origin, GridCoord::new(1, 0)));
        assert_eq!(None, Direction::between(origin, GridCoord::new(0, 0)));
        assert_eq!(None, Direction::between(origin, origin));
    }

    #[test]
    fn linear_ids_round_trip_row_major() {
        assert_eq!(GridCoord::new(1, 0), GridCoord::from_linear(4, 4));
        assert_eq!(GridCoord::new(3, 3), GridCoord::from_linear(15, 4));
        assert_eq!(7, GridCoord::new(1, 3).linear(4));
    }
}
