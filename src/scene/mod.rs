pub(crate) mod events;
pub(crate) mod tree;
pub(crate) mod visual;
