//! # dss-core: Dynamic Stability Suite Core
//!
//! Shared vocabulary for the dynamic-stability batch engine: input-bundle
//! models, sentinel-aware quantities, calculation settings, progress and
//! cancellation plumbing, and the nested result containers the five
//! calculations emit.
//!
//! The engine itself never solves power-flow or transient equations; it
//! drives an external simulator through the `dss-sim` façade. Everything in
//! this crate is therefore plain data: serde-serializable structs ordered
//! the way the inputs were given (regimes → repair schemas → scenarios).
//!
//! ## Sentinels
//!
//! The legacy report convention encodes "not computed / not applicable" as
//! `-1.0`. Internally those states are carried as [`Quantity::Sentinel`]
//! variants so writers can distinguish a genuine zero from a missing value;
//! [`Quantity::report_value`] recovers the legacy encoding at the output
//! boundary.

pub mod error;
pub mod model;
pub mod progress;
pub mod quantity;
pub mod report;
pub mod settings;

pub use error::{DssError, DssResult};
pub use model::{
    active_variants, DynVerdict, PlotVarInfo, RegimeInfo, ScenarioInfo, SectionInfo, ShuntTask,
    VariantInfo,
};
pub use progress::{CancelToken, ProgressSink};
pub use quantity::{BoundaryDistance, Quantity, SentinelReason};
pub use report::{
    CalcResults, CrtTime, CrtTimeReport, CrtTimeSchema, DynEvent, DynReport, DynSchema, MdpEvent,
    MdpReport, MdpSchema, MonitoredValue, ShuntNode, ShuntReport, ShuntSchema, UostEvent,
    UostReport, UostSchema,
};
pub use settings::Settings;
