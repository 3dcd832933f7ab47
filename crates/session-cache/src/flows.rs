//! Session flows built on the stores.
//!
//! These are the contracts the authentication layer relies on. Delivery of
//! codes and links (email, SMS) is the caller's job; nothing here sends anything.
//!
//! - **one_time** - Password reset and email verification links
//! - **two_factor** - Six-digit codes with attempt burning
//! - **login** - Failed-login throttling

mod login;
mod one_time;
mod two_factor;

pub use login::LoginThrottle;
pub use one_time::OneTimeTokens;
pub use two_factor::{TwoFactorChallenge, TwoFactorCodes, TwoFactorOutcome};
