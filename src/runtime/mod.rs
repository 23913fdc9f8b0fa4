//! External interfaces and their default implementations.
//!
//! The engine never touches the file system, processes, clock, keychain, or
//! module registry directly; it goes through the traits defined here.
//! Production code wires the OS-backed implementations, tests wire the
//! in-memory doubles, and embedders can substitute their own.

mod cancel;
mod clock;
mod fs;
mod keychain;
mod process;
mod resolver;

pub use cancel::CancelToken;
pub use clock::{Clock, TestClock, TokioClock};
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use keychain::{KeychainProvider, MemoryKeychain};
pub use process::{
    ChildHandle, ExitStatus, KillSignal, MockChild, MockResponse, MockSpawner, ProcessSpawner,
    SpawnRequest, TokioSpawner,
};
pub use resolver::{InMemoryResolver, ModuleResolver, ResolvedModule};
