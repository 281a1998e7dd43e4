pub mod google_play;
pub mod verifier;
