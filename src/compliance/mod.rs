//! Component G: depositor-protection compliance engine. Read-only over
//! `deposits`, `institution_prefs`, and `config`; never throws on missing
//! data, only surfaces warnings (§4.G).

pub mod limits;
pub mod planner;

pub use limits::{compute_report, ComplianceReport, InstitutionExposure, Severity, Status};
pub use planner::{plan_diversification, DiversificationAllocation, DiversificationPlan};
