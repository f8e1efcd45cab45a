#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Package installation for orchard
//!
//! A uniform install/uninstall contract over several OS backends (session
//! API, root and Shizuku shells, out-of-process installer services), the
//! bookkeeping that ties asynchronous OS callbacks back to the attempt that
//! caused them, and the receiver that resolves those callbacks.

#[macro_use]
mod macros;
pub mod backends;
mod manager;
pub mod os;
mod receiver;
mod selection;
mod session;
pub mod status;

pub use backends::{Installer, SessionContext};
pub use manager::{AppInstaller, InstallerBackends};
pub use os::{
    CommandOutput, CommandRunner, ConfirmationLauncher, DelegateResult, ForegroundProbe,
    InstallDelegate, PackageInventory, PackageSessionApi, SessionParams, ShellCommand,
    TokioCommandRunner,
};
pub use receiver::{InstallStatusReceiver, Resolution};
pub use selection::{select_installer, DeviceCapabilities, InstallerKind};
pub use session::{
    callback_channel, CallbackSink, CallbackStream, ConfirmationIntent, InstallCallback,
    InstallGuard, InstallRequest, SessionId, SessionInfo, SessionTracker, SharedCallbackStream,
};
