//! Stable identities of table elements.
//!
//! Elements are addressed by ids that survive insertions and deletions of
//! their siblings; positional indices are resolved by the table that owns
//! them.

use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

macro_rules! element_id {
    ($($(#[$meta:meta])* $name:ident => $prefix:literal),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
            #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn new(id: u32) -> Self {
                    Self(id)
                }

                pub fn as_u32(self) -> u32 {
                    self.0
                }
            }

            impl Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "{}"), self.0)
                }
            }
        )+
    };
}

element_id! {
    TableId => "T",
    RowId => "R",
    ColumnId => "C",
    SubsetId => "S",
}

/// The kind of a table element; also the kind of reference a formula can make.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub enum ElementKind {
    Table,
    Column,
    Row,
    Cell,
    Subset,
}

impl ElementKind {
    /// Only cells, rows, and columns may own a derivation.
    pub fn is_derivable(&self) -> bool {
        matches!(self, ElementKind::Cell | ElementKind::Row | ElementKind::Column)
    }

    /// Canonical reference prefix used when rendering formulas.
    pub fn prefix(&self) -> &'static str {
        match self {
            ElementKind::Table => "table",
            ElementKind::Column => "col",
            ElementKind::Row => "row",
            ElementKind::Cell => "cell",
            ElementKind::Subset => "subset",
        }
    }
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Handle to one element of one table.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElementRef {
    Table(TableId),
    Column(TableId, ColumnId),
    Row(TableId, RowId),
    Cell(TableId, RowId, ColumnId),
    Subset(TableId, SubsetId),
}

impl ElementRef {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementRef::Table(_) => ElementKind::Table,
            ElementRef::Column(..) => ElementKind::Column,
            ElementRef::Row(..) => ElementKind::Row,
            ElementRef::Cell(..) => ElementKind::Cell,
            ElementRef::Subset(..) => ElementKind::Subset,
        }
    }

    pub fn table(&self) -> TableId {
        match *self {
            ElementRef::Table(t)
            | ElementRef::Column(t, _)
            | ElementRef::Row(t, _)
            | ElementRef::Cell(t, _, _)
            | ElementRef::Subset(t, _) => t,
        }
    }

    pub fn is_derivable(&self) -> bool {
        self.kind().is_derivable()
    }

    /// Row coordinate of cells and rows.
    pub fn row(&self) -> Option<RowId> {
        match *self {
            ElementRef::Row(_, r) | ElementRef::Cell(_, r, _) => Some(r),
            _ => None,
        }
    }

    /// Column coordinate of cells and columns.
    pub fn column(&self) -> Option<ColumnId> {
        match *self {
            ElementRef::Column(_, c) | ElementRef::Cell(_, _, c) => Some(c),
            _ => None,
        }
    }
}

impl Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementRef::Table(t) => write!(f, "{t}"),
            ElementRef::Column(t, c) => write!(f, "{t}!{c}"),
            ElementRef::Row(t, r) => write!(f, "{t}!{r}"),
            ElementRef::Cell(t, r, c) => write!(f, "{t}!{r}{c}"),
            ElementRef::Subset(t, s) => write!(f, "{t}!{s}"),
        }
    }
}
