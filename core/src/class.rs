//! Stressor class bitmasks
//!
//! Every stressor belongs to one or more classes. Classes drive selection
//! (`--class`) and gate the pathological workloads that may destabilise the
//! host.

use bitflags::bitflags;

bitflags! {
    /// Bitmask of stressor categories
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Class: u32 {
        /// CPU compute bound
        const CPU          = 1 << 0;
        /// CPU cache thrashing
        const CPU_CACHE    = 1 << 1;
        /// Device node exercising
        const DEV          = 1 << 2;
        /// Filesystem metadata and data paths
        const FILESYSTEM   = 1 << 3;
        /// GPU exercising
        const GPU          = 1 << 4;
        /// Interrupt load generation
        const INTERRUPT    = 1 << 5;
        /// Raw I/O load
        const IO           = 1 << 6;
        /// Memory pressure
        const MEMORY       = 1 << 7;
        /// Network stack exercising
        const NETWORK      = 1 << 8;
        /// Kernel interface churn
        const OS           = 1 << 9;
        /// Pipe I/O
        const PIPE_IO      = 1 << 10;
        /// Scheduler stressing
        const SCHEDULER    = 1 << 11;
        /// Security subsystem exercising
        const SECURITY     = 1 << 12;
        /// Virtual memory paging pressure
        const VM           = 1 << 13;
        /// Workloads that may hang or reboot the machine; opt-in only
        const PATHOLOGICAL = 1 << 14;
    }
}

impl serde::Serialize for Class {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> serde::Deserialize<'de> for Class {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Ok(Class::from_bits_truncate(bits))
    }
}

/// Class names, in the order they are listed to the user
const CLASS_NAMES: &[(Class, &str)] = &[
    (Class::CPU_CACHE, "cpu-cache"),
    (Class::CPU, "cpu"),
    (Class::DEV, "device"),
    (Class::FILESYSTEM, "filesystem"),
    (Class::GPU, "gpu"),
    (Class::INTERRUPT, "interrupt"),
    (Class::IO, "io"),
    (Class::MEMORY, "memory"),
    (Class::NETWORK, "network"),
    (Class::OS, "os"),
    (Class::PIPE_IO, "pipe"),
    (Class::SCHEDULER, "scheduler"),
    (Class::SECURITY, "security"),
    (Class::VM, "vm"),
    (Class::PATHOLOGICAL, "pathological"),
];

impl Class {
    /// Look up a single class by its user-facing name
    pub fn by_name(name: &str) -> Option<Class> {
        CLASS_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(c, _)| *c)
    }

    /// All user-facing class names
    pub fn names() -> impl Iterator<Item = &'static str> {
        CLASS_NAMES.iter().map(|(_, n)| *n)
    }

    /// The names of every class present in this mask
    pub fn name_list(self) -> Vec<&'static str> {
        CLASS_NAMES
            .iter()
            .filter(|(c, _)| self.contains(*c))
            .map(|(_, n)| *n)
            .collect()
    }
}

/// Result of parsing a `--class` argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassArg {
    /// A mask of selected classes
    Mask(Class),
    /// A trailing `?` asked for the members of this class to be listed
    Query(Class),
}

/// Parse a comma-separated class list.
///
/// A single trailing `?` on a class name turns the parse into a membership
/// query. An unknown name yields the list of valid names in the error.
pub fn parse_class_list(arg: &str) -> Result<ClassArg, String> {
    let mut mask = Class::empty();

    for token in arg.split(',').filter(|t| !t.is_empty()) {
        if let Some(class) = Class::by_name(token) {
            mask |= class;
            continue;
        }
        if let Some(stripped) = token.strip_suffix('?') {
            if let Some(class) = Class::by_name(stripped) {
                return Ok(ClassArg::Query(class));
            }
        }
        let valid: Vec<&str> = Class::names().collect();
        return Err(format!(
            "unknown class: '{}', available classes: {}",
            token,
            valid.join(" ")
        ));
    }

    Ok(ClassArg::Mask(mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name() {
        assert_eq!(Class::by_name("cpu"), Some(Class::CPU));
        assert_eq!(Class::by_name("cpu-cache"), Some(Class::CPU_CACHE));
        assert_eq!(Class::by_name("pipe"), Some(Class::PIPE_IO));
        assert_eq!(Class::by_name("nope"), None);
    }

    #[test]
    fn test_parse_mask() {
        let parsed = parse_class_list("cpu,vm,io").unwrap();
        assert_eq!(
            parsed,
            ClassArg::Mask(Class::CPU | Class::VM | Class::IO)
        );
    }

    #[test]
    fn test_parse_query() {
        let parsed = parse_class_list("memory?").unwrap();
        assert_eq!(parsed, ClassArg::Query(Class::MEMORY));
    }

    #[test]
    fn test_parse_unknown_lists_valid() {
        let err = parse_class_list("cpu,bogus").unwrap_err();
        assert!(err.contains("'bogus'"));
        assert!(err.contains("scheduler"));
    }

    #[test]
    fn test_name_list() {
        let mask = Class::CPU | Class::VM;
        assert_eq!(mask.name_list(), vec!["cpu", "vm"]);
    }
}
