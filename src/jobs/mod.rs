pub mod delivery_worker;
pub mod digest_flusher;
