//! Composite node runners. Only the executor's dispatch calls into these.

pub(crate) mod looping;
pub(crate) mod parallel;
pub(crate) mod sequential;
