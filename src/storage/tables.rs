use redb::TableDefinition;

/// Every key of the embedded engine: key -> StoredEntry (msgpack)
pub const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
