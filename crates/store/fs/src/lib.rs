mod backend;

pub use backend::FsBackend;
