pub(crate) mod compositor;
pub(crate) mod metrics;
pub(crate) mod opts;
