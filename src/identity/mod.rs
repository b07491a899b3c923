pub mod gallery;
pub mod matcher;
pub mod recognizer;

pub use gallery::{normalize, Gallery, GalleryEntry, GalleryError};
pub use matcher::{IdentityMatcher, MatchCandidate, MatchError, MatchResult, MatchVerdict, LONE_IDENTITY_GAP};
pub use recognizer::{recognize, Identified, RecognitionOutcome, RecognitionParams};
