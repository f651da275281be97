//! Per-node link word: parent, side and color.

/// Which child slot of its parent a node occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Black,
}

/// Upward link of a node.
///
/// `side` is meaningless for the root (whose `parent` is `None`) and is kept
/// at `Left` there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    pub parent: Option<usize>,
    pub side: Side,
    pub color: Color,
}

impl Link {
    pub(crate) fn red_leaf(parent: Option<usize>, side: Side) -> Self {
        Self {
            parent,
            side,
            color: Color::Red,
        }
    }

    pub fn is_red(&self) -> bool {
        self.color == Color::Red
    }
}
