pub(crate) mod blend;
pub(crate) mod pixmap;
pub(crate) mod scope;
pub(crate) mod surface;
