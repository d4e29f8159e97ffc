pub mod observable;
pub mod lru_cache;
pub mod profiler;
