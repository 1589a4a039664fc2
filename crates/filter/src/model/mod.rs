//! Navigator abstraction over XML-shaped documents.
//!
//! Filters never hold node references. They work with a seekable cursor whose positions are
//! plain integers, monotone in document order, so node sequences can be stored as `Vec<NodePos>`
//! and sorted or de-duplicated without touching the document.

use crate::error::NavResult;
use compact_str::CompactString;
use std::fmt;

mod document;
mod quota;

pub use document::{BodyAccess, Document, DocumentNavigator};
pub(crate) use document::{resolve_reference, unescape, utf8, xml_error};
pub use quota::{NodeCounter, NodeQuota, QuotaNavigator};

/// Position of a node inside one document. Larger positions come later in document order.
pub type NodePos = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    pub const fn mask(self) -> NodeTypeMask {
        match self {
            Self::Root => NodeTypeMask::ROOT,
            Self::Element => NodeTypeMask::ELEMENT,
            Self::Attribute => NodeTypeMask::ATTRIBUTE,
            Self::Text => NodeTypeMask::TEXT,
            Self::Comment => NodeTypeMask::COMMENT,
            Self::ProcessingInstruction => NodeTypeMask::PROCESSING_INSTRUCTION,
        }
    }
}

/// Set of node kinds accepted by a node test.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeTypeMask(u8);

impl NodeTypeMask {
    pub const NONE: Self = Self(0);
    pub const ROOT: Self = Self(1);
    pub const ELEMENT: Self = Self(1 << 1);
    pub const ATTRIBUTE: Self = Self(1 << 2);
    pub const TEXT: Self = Self(1 << 3);
    pub const COMMENT: Self = Self(1 << 4);
    pub const PROCESSING_INSTRUCTION: Self = Self(1 << 5);
    /// `node()`: every kind reachable on a non-attribute axis.
    pub const CHILD_NODES: Self =
        Self(Self::ELEMENT.0 | Self::TEXT.0 | Self::COMMENT.0 | Self::PROCESSING_INSTRUCTION.0);
    pub const ALL: Self = Self(0b11_1111);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, kind: NodeKind) -> bool {
        self.0 & kind.mask().0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NodeTypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::ROOT, "root"),
            (Self::ELEMENT, "element"),
            (Self::ATTRIBUTE, "attribute"),
            (Self::TEXT, "text"),
            (Self::COMMENT, "comment"),
            (Self::PROCESSING_INSTRUCTION, "pi"),
        ];
        let mut list = f.debug_set();
        for (mask, name) in names {
            if self.0 & mask.0 != 0 {
                list.entry(&name);
            }
        }
        list.finish()
    }
}

/// A seekable read cursor over one document.
///
/// Every `move_*` returns `Ok(false)` and leaves the cursor where it was when the target does
/// not exist. Errors are reserved for policy failures: a consumed quota or a header-only
/// cursor asked to enter the message body.
pub trait Navigator: Clone {
    fn position(&self) -> NodePos;

    /// Jump to a position previously obtained from [`position`](Self::position).
    /// Seeking is free: it is not a traversal step.
    fn set_position(&mut self, pos: NodePos) -> NavResult<()>;

    fn root_position(&self) -> NodePos;

    fn kind(&self) -> NodeKind;
    fn local_name(&self) -> &str;
    fn namespace_uri(&self) -> &str;
    fn prefix(&self) -> &str;

    /// XPath string value of the current node.
    fn string_value(&self) -> NavResult<CompactString>;

    fn move_to_root(&mut self) -> NavResult<()>;
    fn move_to_parent(&mut self) -> NavResult<bool>;
    fn move_to_first_child(&mut self) -> NavResult<bool>;
    /// Move to the next sibling. Attributes have no siblings on this axis.
    fn move_to_next(&mut self) -> NavResult<bool>;
    fn move_to_first_attribute(&mut self) -> NavResult<bool>;
    fn move_to_next_attribute(&mut self) -> NavResult<bool>;
    fn move_to_attribute(&mut self, local: &str, ns: &str) -> NavResult<bool>;

    /// Resolve a prefix against the declarations in scope at the current node.
    fn lookup_namespace(&self, prefix: &str) -> Option<CompactString>;

    fn is_element_named(&self, local: &str, ns: &str) -> bool {
        self.kind() == NodeKind::Element && self.local_name() == local && self.namespace_uri() == ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_cover_their_kinds() {
        assert!(NodeTypeMask::CHILD_NODES.contains(NodeKind::Text));
        assert!(!NodeTypeMask::CHILD_NODES.contains(NodeKind::Attribute));
        assert!(NodeTypeMask::ALL.contains(NodeKind::Root));
        assert!(NodeTypeMask::NONE.is_empty());
        assert_eq!(
            NodeTypeMask::ELEMENT.union(NodeTypeMask::TEXT),
            NodeTypeMask(NodeTypeMask::ELEMENT.0 | NodeTypeMask::TEXT.0)
        );
    }
}
