//! Unit constants
//!
//! Internal lengths are millimetres and internal energies are MeV, the same
//! units the transport engine reports. Divide by a constant to express a value
//! in that unit (`pos_mm / CM` gives centimetres).

pub const MM: f64 = 1.0;
pub const CM: f64 = 10.0 * MM;

pub const MEV: f64 = 1.0;
pub const EV: f64 = 1.0e-6 * MEV;
pub const GEV: f64 = 1.0e3 * MEV;

/// Muon rest mass.
pub const MUON_MASS: f64 = 105.658_375_5 * MEV;

/// Electron rest mass.
pub const ELECTRON_MASS: f64 = 0.510_998_95 * MEV;
