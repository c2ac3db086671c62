//! Pipeline stages
//!
//! 1. [`region_enumerator`]: detection service → de-duplicated Regions
//! 2. [`crop_extractor`]: Region → padded JPEG crop (local, synchronous)
//! 3. [`identifier`]: crop → Identification (timeout + retry)
//! 4. [`validator`]: crop + Identification → Validation (never fails the item)

pub mod crop_extractor;
pub mod identifier;
pub mod region_enumerator;
pub mod validator;

pub use identifier::{IdentifyAttempts, Identifier};
pub use region_enumerator::RegionEnumerator;
pub use validator::{ValidationOutcome, Validator};
