pub mod entitlements;
pub mod enums;
pub mod subscription_patches;
pub mod trials;
