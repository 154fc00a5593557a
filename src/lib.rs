pub use config::{ClassModes, ConfigDelta, PlatoonConfig};
pub use error::Error;
pub use manager::{PlatoonManager, SpawnResult};
pub use mode::PlatoonMode;
pub use platoon::Platoon;
pub use sim::{ClassInfo, LeaderInfo, Simulator, SpawnRequest, Telemetry, TelemetryField};
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use stats::StatsSnapshot;
pub use util::Interval;
pub use vehicle::{ManagedVehicle, VehicleState};

mod config;
mod error;
mod manager;
mod mode;
mod platoon;
mod sim;
mod stats;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [ManagedVehicle].
    pub struct VehicleId;
    /// Unique ID of a [Platoon].
    pub struct PlatoonId;
}

type VehicleSet = SlotMap<VehicleId, ManagedVehicle>;
type PlatoonSet = SlotMap<PlatoonId, Platoon>;
