/// Database row types: these map directly to SQLite rows.
/// Distinct from huddle-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub created_at: String,
}

pub struct DocumentRow {
    pub id: String,
    pub collection: String,
    /// JSON body of the document, without its id.
    pub body: String,
    pub created_at: String,
}

pub struct BlobRow {
    pub key: String,
    pub owner_id: String,
    pub size: i64,
    pub created_at: String,
}
