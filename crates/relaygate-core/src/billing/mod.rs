//! Quota admission: estimating, reserving, settling and refunding.

mod estimate;
mod quota;
mod ratio;

pub use estimate::{estimate_cost, final_quota, image_quota, image_size_ratio};
pub use quota::{QuotaError, QuotaLedger, Reservation, ReservationState};
pub use ratio::{DEFAULT_MODEL_RATIO, RatioError, RatioTable};
