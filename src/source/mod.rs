//! Camera sources.
//!
//! The relay never talks to a transport directly. It sees a camera as:
//! - a `CameraDriver` that can scan for identities and open a blocking connection,
//! - a `CameraLink` for one connected camera that can start/stop a frame stream,
//! - callbacks into a `StreamListener` (`on_frame` / `on_disconnected`) delivered
//!   on whatever thread the driver chooses.
//!
//! Sources:
//! - Built-in emulator (`emulator::EmulatorDriver`), always available
//! - Hardware drivers live outside this crate and implement the same traits
//!
//! Sources MUST NOT:
//! - Retain a `RawFrame` after handing it to the listener
//! - Assume the listener returns quickly (it blocks while the frame buffer is full)

use std::fmt;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::frame::RawFrame;

pub mod emulator;

pub use emulator::{EmulatorConfig, EmulatorDriver};

/// Device-id marker of the native emulator.
pub const CPP_EMULATOR_MARKER: &str = "C++ Emulator";
/// Device-id marker of the emulated FLIR ONE.
pub const FLIR_ONE_EMULATOR_MARKER: &str = "EMULATED FLIR ONE";

// ----------------------------------------------------------------------------
// Identities
// ----------------------------------------------------------------------------

/// How a camera is reached. Informational only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommunicationInterface {
    Usb,
    Emulator,
}

/// Category used to pick a camera. Has no effect on protocol behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Device,
    CppEmulator,
    FlirOneEmulator,
}

impl IdentityKind {
    pub fn classify(device_id: &str) -> Self {
        if device_id.contains(CPP_EMULATOR_MARKER) {
            IdentityKind::CppEmulator
        } else if device_id.contains(FLIR_ONE_EMULATOR_MARKER) {
            IdentityKind::FlirOneEmulator
        } else {
            IdentityKind::Device
        }
    }

    pub fn is_emulator(&self) -> bool {
        !matches!(self, IdentityKind::Device)
    }

    /// Parse the short names used on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "device" | "flir-one" | "hardware" => Some(IdentityKind::Device),
            "cpp" | "cpp-emulator" | "emulator" => Some(IdentityKind::CppEmulator),
            "flir-one-emulator" | "emulated-flir-one" => Some(IdentityKind::FlirOneEmulator),
            _ => None,
        }
    }
}

/// Addressable handle of a discovered camera.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub device_id: String,
    pub interface: CommunicationInterface,
    pub kind: IdentityKind,
}

impl Identity {
    pub fn new(device_id: impl Into<String>, interface: CommunicationInterface) -> Self {
        let device_id = device_id.into();
        let kind = IdentityKind::classify(&device_id);
        Self {
            device_id,
            interface,
            kind,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.device_id, self.interface)
    }
}

/// Cameras found by the most recent scans, in discovery order.
#[derive(Clone, Debug, Default)]
pub struct CameraRegistry {
    identities: Vec<Identity>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity unless it is already known.
    pub fn add(&mut self, identity: Identity) -> bool {
        if self.identities.contains(&identity) {
            return false;
        }
        self.identities.push(identity);
        true
    }

    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn list(&self) -> &[Identity] {
        &self.identities
    }

    pub fn clear(&mut self) {
        self.identities.clear();
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// First identity of the given category.
    pub fn find(&self, kind: IdentityKind) -> Option<&Identity> {
        self.identities.iter().find(|identity| identity.kind == kind)
    }
}

// ----------------------------------------------------------------------------
// Driver traits
// ----------------------------------------------------------------------------

/// Callback interface a connected camera delivers into.
pub trait StreamListener: Send + Sync {
    /// A new frame. May block (backpressure). An `Err` means the listener will
    /// not accept further frames and the source should stop delivering.
    fn on_frame(&self, frame: RawFrame) -> Result<(), PipelineError>;

    /// The camera went away on its own.
    fn on_disconnected(&self, reason: Option<String>);
}

/// One connected camera.
pub trait CameraLink: Send {
    /// Start delivering frames to `listener`.
    fn subscribe(&mut self, listener: Arc<dyn StreamListener>) -> Result<(), PipelineError>;

    /// Stop delivering frames. Returns once no further callback will be made.
    ///
    /// Callers must make sure a listener blocked in `on_frame` can return
    /// (close the frame buffer first), otherwise this waits for it.
    fn unsubscribe(&mut self);

    /// Tear the connection down. Implies `unsubscribe`.
    fn disconnect(&mut self);

    fn is_streaming(&self) -> bool;
}

/// Entry point of a camera backend.
pub trait CameraDriver: Send + Sync {
    fn scan(&self) -> Result<Vec<Identity>, PipelineError>;

    /// Blocking connect. Never call from an interactive thread.
    fn connect(&self, identity: &Identity) -> Result<Box<dyn CameraLink>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_classified_by_device_id() {
        assert_eq!(
            IdentityKind::classify("C++ Emulator 1"),
            IdentityKind::CppEmulator
        );
        assert_eq!(
            IdentityKind::classify("EMULATED FLIR ONE"),
            IdentityKind::FlirOneEmulator
        );
        assert_eq!(
            IdentityKind::classify("FLIR ONE Pro 1234"),
            IdentityKind::Device
        );
    }

    #[test]
    fn registry_finds_first_non_emulator_device() {
        let mut registry = CameraRegistry::new();
        registry.add(Identity::new(
            "C++ Emulator",
            CommunicationInterface::Emulator,
        ));
        registry.add(Identity::new(
            "EMULATED FLIR ONE",
            CommunicationInterface::Emulator,
        ));
        registry.add(Identity::new("FLIR ONE Edge", CommunicationInterface::Usb));

        let device = registry.find(IdentityKind::Device).expect("device");
        assert_eq!(device.device_id, "FLIR ONE Edge");
        let emulator = registry.find(IdentityKind::CppEmulator).expect("emulator");
        assert_eq!(emulator.device_id, "C++ Emulator");
    }

    #[test]
    fn registry_ignores_duplicates_and_clears() {
        let mut registry = CameraRegistry::new();
        let identity = Identity::new("EMULATED FLIR ONE", CommunicationInterface::Emulator);
        assert!(registry.add(identity.clone()));
        assert!(!registry.add(identity));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).map(|i| i.kind), Some(IdentityKind::FlirOneEmulator));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.find(IdentityKind::Device).is_none());
    }

    #[test]
    fn cli_names_map_to_kinds() {
        assert_eq!(IdentityKind::from_name("cpp"), Some(IdentityKind::CppEmulator));
        assert_eq!(
            IdentityKind::from_name("FLIR-ONE-EMULATOR"),
            Some(IdentityKind::FlirOneEmulator)
        );
        assert_eq!(IdentityKind::from_name("device"), Some(IdentityKind::Device));
        assert_eq!(IdentityKind::from_name("toaster"), None);
    }
}
