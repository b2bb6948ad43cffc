//! Simulator table and column vocabulary.
//!
//! Names are the simulator's own; they appear verbatim in selectors and
//! cell I/O. Keeping them in one place stops the solvers from sprinkling
//! string literals.

/// Buses.
pub const NODE: &str = "node";
/// Branches (lines and transformers).
pub const BRANCH: &str = "vetv";
/// Flow cross-sections.
pub const SECTION: &str = "sechen";
/// Timed scenario actions.
pub const SCN_ACTIONS: &str = "DFWAutoActionScn";
/// Dynamic-run switches.
pub const DYNAMICS: &str = "com_dynamics";
/// Continuation engine state.
pub const UT_COMMON: &str = "ut_common";
/// Repair-schema variants.
pub const VARIANTS: &str = "var_mer";
/// Plot-variable declarations.
pub const PLOT_VARS: &str = "ots_val";
/// Emergency-control automation records.
pub const LAPNU: &str = "LAPNU";

pub mod col {
    // node
    pub const NY: &str = "ny";
    pub const UHOM: &str = "uhom";
    pub const VRAS: &str = "vras";
    pub const BSH: &str = "bsh";
    pub const SEL: &str = "sel";

    // vetv
    pub const IP: &str = "ip";
    pub const IQ: &str = "iq";
    pub const NP: &str = "np";
    pub const R: &str = "r";
    pub const X: &str = "x";
    pub const B: &str = "b";
    pub const STA: &str = "sta";

    // sechen
    pub const PSECH: &str = "psech";
    pub const NS: &str = "ns";
    pub const NAME: &str = "name";

    // DFWAutoActionScn
    pub const ID: &str = "Id";
    pub const TYPE: &str = "Type";
    pub const FORMULA: &str = "Formula";
    pub const OBJECT_CLASS: &str = "ObjectClass";
    pub const OBJECT_PROP: &str = "ObjectProp";
    pub const OBJECT_KEY: &str = "ObjectKey";
    pub const RUNS_COUNT: &str = "RunsCount";
    pub const TIME_START: &str = "TimeStart";
    pub const DT: &str = "DT";
    pub const STATE: &str = "State";

    // com_dynamics
    pub const TRAS: &str = "Tras";
    pub const MAX_RESULT_FILES: &str = "MaxResultFiles";
    pub const SNAP_AUTO_LOAD: &str = "SnapAutoLoad";
    pub const SNAP_MAX_COUNT: &str = "SnapMaxCount";

    // ut_common
    pub const KFC: &str = "kfc";
    pub const SUM_KFC: &str = "sum_kfc";

    // var_mer / ots_val
    pub const NUM: &str = "Num";
    pub const TABL: &str = "tabl";
    pub const VIBORK: &str = "vibork";
    pub const OTS_FORMULA: &str = "formula";
}

/// Action object classes inside a scenario.
pub mod object_class {
    pub const NODE: &str = "node";
    pub const BRANCH: &str = "vetv";
}
