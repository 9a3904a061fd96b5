//! Protocol engine for the CapnoTrainer dongle.
//!
//! The dongle multiplexes data from wirelessly connected sensors (CapnoTrainer
//! GO capnography units, EMG sensors and HRV sensors) onto one or two serial
//! links. This crate frames and demultiplexes those links, tracks which device
//! sits behind each connection handle, decodes payloads into `f32` samples and
//! hands them to a consumer callback.
//!
//! ```no_run
//! use capnolink::{Dispatcher, DongleConfig, Sample};
//!
//! let config = DongleConfig::new("/dev/ttyACM0", None);
//! let dongle = Dispatcher::new(config, |s: &Sample<'_>| {
//!     println!("{} #{} {:?}: {:?}", s.device_type, s.handle, s.data_type, s.values);
//! })?;
//! dongle.initialize()?;
//! # Ok::<(), capnolink::DongleError>(())
//! ```

// Must come first so tlog! is visible to every module
#[macro_use]
pub mod logging;

pub mod checksums;
pub mod decoders;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod io;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod sink;

pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use dispatcher::Dispatcher;
pub use error::{DongleError, Result};
pub use io::{find_ports_by_usb_id, list_serial_ports, DonglePortInfo, Link, LinkControl, LinkId};
pub use protocol::{DataType, DeviceType, Frame, FrameKind, COMMAND_SIZE, READ_CHUNK_SIZE, VERSION};
pub use registry::{DeviceRecord, DeviceRegistry};
pub use settings::{DongleConfig, LinkSettings, Parity};
pub use sink::{ChannelSink, LinkEnd, OwnedSample, Sample, SampleSink, SinkEvent};
