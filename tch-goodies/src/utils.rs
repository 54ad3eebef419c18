/// The tolerance added to IoU denominators.
pub const EPSILON: f64 = 1e-16;
