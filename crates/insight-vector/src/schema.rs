use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const COL_ID: &str = "id";
pub const COL_TEXT: &str = "text";
pub const COL_SECTION: &str = "section";
pub const COL_PAGE_REF: &str = "page_ref";
pub const COL_CATEGORY: &str = "category";
pub const COL_EXTRA: &str = "extra_json";
pub const COL_SEQ: &str = "seq";
pub const COL_VECTOR: &str = "vector";
pub const COL_DISTANCE: &str = "_distance";

/// Chunk table. `seq` records first-insertion order and survives updates.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new(COL_ID, DataType::Utf8, false),
		Field::new(COL_TEXT, DataType::Utf8, false),
		Field::new(COL_SECTION, DataType::Utf8, true),
		Field::new(COL_PAGE_REF, DataType::Utf8, true),
		Field::new(COL_CATEGORY, DataType::Utf8, true),
		Field::new(COL_EXTRA, DataType::Utf8, false),
		Field::new(COL_SEQ, DataType::UInt64, false),
		Field::new(COL_VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

pub fn build_meta_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("key", DataType::Utf8, false),
		Field::new("value", DataType::Utf8, false),
		Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
	]))
}
