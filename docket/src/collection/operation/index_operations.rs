use crate::collection::operation::CollectionOps;
use crate::common::{Fields, OpContext, ID_INDEX_NAME};
use crate::errors::{DocketError, DocketResult, ErrorKind};
use crate::index::{derive_index_name, IndexDescriptor, IndexOptions};

impl CollectionOps {
    /// Creates a b-tree index and back-fills it from existing records.
    ///
    /// Returns whether a new index was created (an exact duplicate request
    /// is an idempotent no-op). The back-fill is interruptible at yield
    /// points; an aborted or failed build removes the half-built index so
    /// nothing partial stays visible.
    pub(crate) fn create_index(
        &self,
        fields: Fields,
        options: &IndexOptions,
        name: Option<&str>,
        ctx: &OpContext,
    ) -> DocketResult<bool> {
        let derived = derive_index_name(&fields);
        let name = name.unwrap_or(&derived);

        // serialize with document writers so the back-fill misses nothing
        let _guard = self.write_lock.lock();
        let outcome = self.catalog.create_btree(name, fields, options)?;
        if !outcome.created {
            return Ok(false);
        }

        if let Err(e) = self.backfill(&outcome.index, ctx) {
            // no partially visible index is left behind
            if let Err(drop_err) = self.catalog.drop_index(name) {
                log::warn!("Failed to remove aborted index {}: {}", name, drop_err);
            }
            self.planner.invalidate_cache();
            return Err(e);
        }

        self.planner.invalidate_cache();
        Ok(true)
    }

    /// Creates a text index over one field, back-filled the same way.
    pub(crate) fn create_text_index(
        &self,
        fields: Fields,
        name: Option<&str>,
        ctx: &OpContext,
    ) -> DocketResult<bool> {
        let derived = format!("{}_text", fields.field_names().join("_"));
        let name = name.unwrap_or(&derived);

        let _guard = self.write_lock.lock();
        let outcome = self.catalog.create_text(name, fields)?;
        if !outcome.created {
            return Ok(false);
        }

        if let Err(e) = self.backfill(&outcome.index, ctx) {
            if let Err(drop_err) = self.catalog.drop_index(name) {
                log::warn!("Failed to remove aborted index {}: {}", name, drop_err);
            }
            self.planner.invalidate_cache();
            return Err(e);
        }

        self.planner.invalidate_cache();
        Ok(true)
    }

    fn backfill(
        &self,
        index: &crate::index::CollectionIndex,
        ctx: &OpContext,
    ) -> DocketResult<()> {
        let snapshot = self.store.snapshot();
        let mut ticker = ctx.ticker();
        for (id, record) in snapshot.iter() {
            ticker.tick()?;
            index.add_document(id, &record.document)?;
        }
        Ok(())
    }

    /// Drops one index. The `_id` index cannot be dropped.
    pub(crate) fn drop_index(&self, name: &str) -> DocketResult<()> {
        if name == ID_INDEX_NAME {
            log::error!("Cannot drop the _id index");
            return Err(DocketError::new(
                "Cannot drop the _id index",
                ErrorKind::InvalidOperation,
            ));
        }
        let _guard = self.write_lock.lock();
        self.catalog.drop_index(name)?;
        self.planner.invalidate_cache();
        Ok(())
    }

    /// Drops every index except the `_id` index.
    pub(crate) fn drop_all_indexes(&self) -> DocketResult<Vec<String>> {
        let _guard = self.write_lock.lock();
        let names: Vec<String> = self
            .catalog
            .descriptors()
            .iter()
            .map(|d| d.name().to_string())
            .filter(|n| n != ID_INDEX_NAME)
            .collect();
        for name in &names {
            self.catalog.drop_index(name)?;
        }
        self.planner.invalidate_cache();
        Ok(names)
    }

    pub(crate) fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.catalog.descriptors()
    }
}
