//! The handful of well-known UIDs the upper layer itself needs. The
//! full SOP class and transfer syntax registries belong to the data-set
//! layer above this crate.

/// The DICOM application context name.
pub const APPLICATION_CONTEXT: &str = "1.2.840.10008.3.1.1.1";

/// Verification SOP class (C-ECHO).
pub const VERIFICATION: &str = "1.2.840.10008.1.1";

/// Implicit VR Little Endian.
pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";

/// Explicit VR Little Endian.
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// JPEG 2000 Image Compression (Lossless Only).
pub const JPEG2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";

/// JPEG 2000 Image Compression.
pub const JPEG2000: &str = "1.2.840.10008.1.2.4.91";

/// Secondary Capture Image Storage, the classic smoke-test SOP class.
pub const SECONDARY_CAPTURE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";

/// Our implementation class UID, rooted in the UUID-derived arc.
pub const IMPLEMENTATION_CLASS: &str = "2.25.184747356037275098592078219103542425";

/// Our implementation version name (at most 16 characters).
pub const IMPLEMENTATION_VERSION: &str = "VESAL_0_1";
