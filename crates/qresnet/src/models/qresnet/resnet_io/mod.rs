//! # `QResNet` Checkpoint IO
pub mod pytorch_stubs;
