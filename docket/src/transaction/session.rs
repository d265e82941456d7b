use crate::database::Docket;
use crate::errors::DocketResult;
use crate::transaction::Transaction;

/// A client session, from which transactions are started.
///
/// Sessions are cheap handles; one session runs at most one transaction at
/// a time (enforced by ownership: [`Session::begin_transaction`] returns a
/// [Transaction] that must be committed or aborted before the next call
/// reasonably begins).
#[derive(Clone)]
pub struct Session {
    db: Docket,
}

impl Session {
    pub(crate) fn new(db: Docket) -> Self {
        Session { db }
    }

    /// Starts a transaction. Snapshots are taken lazily per collection on
    /// first access.
    pub fn begin_transaction(&self) -> DocketResult<Transaction> {
        Ok(Transaction::new(self.db.clone()))
    }
}
