//! 包模型：身份指纹、标记、操作选项与忽略更新库

pub mod identity;
pub mod ignored;
pub mod options;
pub mod types;

pub use identity::fingerprint;
pub use ignored::IgnoredUpdates;
pub use options::{InstallOptions, InstallScope, OperationKind, SourceOperationKind};
pub use types::{Package, PackageRef, PackageTag, SourceRef};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_does_not_affect_fingerprint() {
        let pkg = Package::new("wget", "Wget", "1.0", SourceRef::new("pacman", "extra"));
        let before = (pkg.fingerprint(false), pkg.fingerprint(true));
        pkg.set_tag(PackageTag::Failed);
        pkg.set_tag(PackageTag::Pinned);
        assert_eq!(before, (pkg.fingerprint(false), pkg.fingerprint(true)));
    }

    #[test]
    fn versions_share_unversioned_identity() {
        let a = Package::new("wget", "Wget", "1.0", SourceRef::new("pacman", "extra"));
        let b = Package::new("wget", "Wget", "2.0", SourceRef::new("pacman", "extra"));
        assert!(a.is_equivalent_to(&b));
        assert_ne!(a.fingerprint(true), b.fingerprint(true));
    }

    #[test]
    fn clone_keeps_tag_but_not_shared_state() {
        let a = Package::new("wget", "Wget", "1.0", SourceRef::new("pacman", "extra"));
        a.set_tag(PackageTag::OnQueue);
        let b = a.clone();
        assert_eq!(b.tag(), PackageTag::OnQueue);
        b.set_tag(PackageTag::Default);
        assert_eq!(a.tag(), PackageTag::OnQueue);
    }
}
