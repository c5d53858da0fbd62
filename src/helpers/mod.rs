//! Collaborator seams and their production implementations
//!
//! Stages reach the outside world only through these modules:
//!
//! - **process**: [`process::ProcessRunner`], search-path composition
//! - **download**: [`download::Downloader`] with a checksummed cache
//! - **extract**: gzip tarball extraction
//! - **fs_utils**: bounded file search, wholesale directory replacement
//! - **packages**: [`packages::HostPackages`], the host's package registry
//! - **prompt**: [`prompt::Prompter`], operator choices

pub mod download;
pub mod extract;
pub mod fs_utils;
pub mod packages;
pub mod process;
pub mod prompt;
