use crate::compartment::{Compartment, Stored};
use crate::types::TagType;

#[derive(Debug)]
pub(crate) struct TagData {
    pub ty: TagType,
}

/// An exception tag identity. Tags are compared by identity, never by
/// signature: two instances of the same module get distinct tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(pub(crate) Stored<TagData>);

impl Tag {
    pub fn new(compartment: &mut Compartment, ty: TagType) -> Tag {
        Tag(compartment.push_tag(TagData { ty }))
    }

    pub fn ty(&self, compartment: &Compartment) -> TagType {
        compartment[self.0].ty
    }
}
