pub const MODEL_NAME: &str = "all-MiniLM-L6-v2";
pub const VECTOR_SIZE: usize = 384; // all-MiniLM-L6-v2 embedding Size: 384 dimensions
pub const MAX_TOKENS_PER_CHUNK: usize = 256; // all-MiniLM-L6-v2 embedding model max tokens limit
