pub(crate) mod cache;
pub(crate) mod check;

pub(crate) use cache::cache;
pub(crate) use check::check;
