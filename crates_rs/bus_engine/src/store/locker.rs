use std::fmt;

/// How a SQL store holds rows it reads before writing them.
///
/// Chosen once when the store is built: [`RowLocker`] for pools with
/// concurrent writers, [`NoopLocker`] only when the pool has a single
/// connection and transactions are therefore serialized already.
pub trait Locker: Send + Sync + fmt::Debug {
    /// Clause appended to `SELECT` statements that read rows about to be written.
    fn for_update(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RowLocker;

impl Locker for RowLocker {
    fn for_update(&self) -> &'static str {
        " FOR UPDATE"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocker;

impl Locker for NoopLocker {
    fn for_update(&self) -> &'static str {
        ""
    }
}
