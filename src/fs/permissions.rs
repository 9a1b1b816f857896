//! Tri-state Unix permission bits.

bitflags::bitflags! {
    /// The nine Unix permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnixPermissions: u32 {
        const USER_READ = 0o400;
        const USER_WRITE = 0o200;
        const USER_EXECUTE = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXECUTE = 0o010;
        const OTHER_READ = 0o004;
        const OTHER_WRITE = 0o002;
        const OTHER_EXECUTE = 0o001;
    }
}

/// Permission bits covered by [`Permissions`].
pub const PERMISSION_BITS: u32 = UnixPermissions::all().bits();

/// State of a single permission bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    /// Leave the bit as it is.
    ///
    /// To set read while leaving write and execute alone, use
    /// `(Set, Unchanged, Unchanged)`.
    #[default]
    Unchanged,
    /// Enable the bit.
    Set,
    /// Disable the bit.
    Unset,
}

impl Permission {
    /// Returns `other` unless it is [`Permission::Unchanged`], in which case
    /// `self` is kept.
    pub fn overwrite(&self, other: &Self) -> Self {
        match other {
            Self::Unchanged => *self,
            Self::Set => Self::Set,
            Self::Unset => Self::Unset,
        }
    }

    fn from_flag(mode: UnixPermissions, flag: UnixPermissions) -> Self {
        if mode.contains(flag) {
            Self::Set
        } else {
            Self::Unset
        }
    }

    fn apply(self, mode: &mut UnixPermissions, flag: UnixPermissions) {
        match self {
            Self::Unchanged => {}
            Self::Set => mode.insert(flag),
            Self::Unset => mode.remove(flag),
        }
    }
}

/// Read, write and execute bits for one principal class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopedPermissions {
    pub read: Permission,
    pub write: Permission,
    pub execute: Permission,
}

/// Read, write and execute flags of one principal class.
type ScopeFlags = [UnixPermissions; 3];

const USER: ScopeFlags = [
    UnixPermissions::USER_READ,
    UnixPermissions::USER_WRITE,
    UnixPermissions::USER_EXECUTE,
];
const GROUP: ScopeFlags = [
    UnixPermissions::GROUP_READ,
    UnixPermissions::GROUP_WRITE,
    UnixPermissions::GROUP_EXECUTE,
];
const OTHER: ScopeFlags = [
    UnixPermissions::OTHER_READ,
    UnixPermissions::OTHER_WRITE,
    UnixPermissions::OTHER_EXECUTE,
];

impl ScopedPermissions {
    pub fn new(read: Permission, write: Permission, execute: Permission) -> Self {
        Self {
            read,
            write,
            execute,
        }
    }

    /// Bit-by-bit [`Permission::overwrite`].
    pub fn overwrite(&self, other: &Self) -> Self {
        Self {
            read: self.read.overwrite(&other.read),
            write: self.write.overwrite(&other.write),
            execute: self.execute.overwrite(&other.execute),
        }
    }

    fn from_flags(mode: UnixPermissions, [read, write, execute]: ScopeFlags) -> Self {
        Self {
            read: Permission::from_flag(mode, read),
            write: Permission::from_flag(mode, write),
            execute: Permission::from_flag(mode, execute),
        }
    }

    fn apply(&self, mode: &mut UnixPermissions, [read, write, execute]: ScopeFlags) {
        self.read.apply(mode, read);
        self.write.apply(mode, write);
        self.execute.apply(mode, execute);
    }
}

/// User, group and other permissions of a Unix-like file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub user: ScopedPermissions,
    pub group: ScopedPermissions,
    pub other: ScopedPermissions,
}

impl Permissions {
    /// Permissions that change nothing when applied.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Converts a Unix mode, ignoring everything above the nine permission
    /// bits.
    pub fn from_mode(mode: u32) -> Self {
        let flags = UnixPermissions::from_bits_truncate(mode);
        Self {
            user: ScopedPermissions::from_flags(flags, USER),
            group: ScopedPermissions::from_flags(flags, GROUP),
            other: ScopedPermissions::from_flags(flags, OTHER),
        }
    }

    /// Converts to a Unix mode. Unchanged bits are reported as cleared.
    pub fn as_mode(&self) -> u32 {
        let mut flags = UnixPermissions::empty();
        self.apply(&mut flags);
        flags.bits()
    }

    /// Bit-by-bit [`Permission::overwrite`].
    pub fn overwrite(&self, other: &Self) -> Self {
        Self {
            user: self.user.overwrite(&other.user),
            group: self.group.overwrite(&other.group),
            other: self.other.overwrite(&other.other),
        }
    }

    /// Applies these permissions over an existing mode, keeping the bits
    /// above [`PERMISSION_BITS`] (setuid, sticky, file type) untouched.
    pub fn apply_to_mode(&self, mode: u32) -> u32 {
        let mut flags = UnixPermissions::from_bits_truncate(mode);
        self.apply(&mut flags);
        (mode & !PERMISSION_BITS) | flags.bits()
    }

    fn apply(&self, flags: &mut UnixPermissions) {
        self.user.apply(flags, USER);
        self.group.apply(flags, GROUP);
        self.other.apply(flags, OTHER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Permission::{Set, Unchanged, Unset};

    #[test]
    fn test_permission_overwrite() {
        for a in [Unchanged, Set, Unset] {
            for b in [Unchanged, Set, Unset] {
                let expected = if b == Unchanged { a } else { b };
                assert_eq!(a.overwrite(&b), expected, "{a:?} overwritten by {b:?}");
            }
        }
    }

    #[test]
    fn test_mode_round_trip() {
        for mode in 0..=PERMISSION_BITS {
            assert_eq!(Permissions::from_mode(mode).as_mode(), mode);
        }
    }

    #[test]
    fn test_from_mode_ignores_high_bits() {
        let perms = Permissions::from_mode(0o104_755);
        assert_eq!(perms.as_mode(), 0o755);
        assert_eq!(perms.user, ScopedPermissions::new(Set, Set, Set));
        assert_eq!(perms.group, ScopedPermissions::new(Set, Unset, Set));
    }

    #[test]
    fn test_unchanged_bits_are_cleared_in_mode() {
        let perms = Permissions {
            user: ScopedPermissions::new(Set, Unchanged, Unset),
            ..Permissions::unchanged()
        };
        assert_eq!(perms.as_mode(), 0o400);
    }

    #[test]
    fn test_scoped_overwrite_keeps_unchanged_bits() {
        let current = Permissions::from_mode(0o644);
        let read_only = Permissions {
            user: ScopedPermissions::new(Unchanged, Unset, Unchanged),
            group: ScopedPermissions::new(Unchanged, Unset, Unchanged),
            other: ScopedPermissions::new(Unchanged, Unset, Unchanged),
        };
        assert_eq!(current.overwrite(&read_only).as_mode(), 0o444);
    }

    #[test]
    fn test_flags_cover_permission_bits() {
        assert_eq!(PERMISSION_BITS, 0o777);
        let flags = UnixPermissions::from_bits_truncate(0o4_640);
        assert!(flags.contains(UnixPermissions::USER_READ | UnixPermissions::GROUP_READ));
        assert!(!flags.contains(UnixPermissions::OTHER_READ));
        assert_eq!(flags.bits(), 0o640);
    }

    #[test]
    fn test_apply_to_mode_preserves_special_bits() {
        let exec = Permissions {
            other: ScopedPermissions::new(Unchanged, Unchanged, Set),
            ..Permissions::unchanged()
        };
        assert_eq!(exec.apply_to_mode(0o100_640), 0o100_641);
        assert_eq!(Permissions::unchanged().apply_to_mode(0o4750), 0o4750);
    }
}
