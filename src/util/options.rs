//! User-visible heap parameters.
//!
//! Options are set from environment variables (prefix `GENGC_`), from the
//! embedder's command line via [`Options::set_bulk_from_command_line`], or
//! individually. Each option carries a validator; setting an invalid value
//! leaves the default in place.

use crate::util::constants::*;
use crate::util::memory;
use regex::Regex;
use std::fmt::Debug;
use std::ops::Deref;
use std::str::FromStr;

/// A heap size in bytes, parsed from a decimal number with an optional
/// K/M/G/T suffix (`-Xmx`-style, e.g. `512M`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeapSize(pub usize);

impl HeapSize {
    const K: u64 = 1024;
    const M: u64 = 1024 * Self::K;
    const G: u64 = 1024 * Self::M;
    const T: u64 = 1024 * Self::G;

    /// Parse a size representation, which could be a number to represent
    /// bytes, or a number with the suffix K/k/M/m/G/g/T/t. Return the byte
    /// number if it can be parsed properly, otherwise return an error string.
    pub fn parse_size(s: &str) -> Result<usize, String> {
        lazy_static! {
            static ref SIZE_REGEX: Regex = Regex::new(r"^(?P<num>\d+)(?P<suffix>[kKmMgGtT]?)$").unwrap();
        }
        let captures = SIZE_REGEX
            .captures(s)
            .ok_or_else(|| format!("Failed to parse size: {:?}", s))?;
        let num = captures["num"]
            .parse::<u64>()
            .map_err(|e| e.to_string())?;
        let size = match captures["suffix"].to_lowercase().as_str() {
            "" => Some(num),
            "k" => num.checked_mul(Self::K),
            "m" => num.checked_mul(Self::M),
            "g" => num.checked_mul(Self::G),
            "t" => num.checked_mul(Self::T),
            _ => unreachable!(),
        };
        if let Some(size) = size {
            size.try_into().map_err(|_| format!("size overflow: {}", size))
        } else {
            Err(format!("size overflow: {}", s))
        }
    }
}

impl Deref for HeapSize {
    type Target = usize;

    fn deref(&self) -> &usize {
        &self.0
    }
}

impl FromStr for HeapSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_size(s).map(HeapSize)
    }
}

fn always_valid<T>(_: &T) -> bool {
    true
}

/// A heap option of a given type.
/// This type allows us to store some metadata for the option. To get the value of an option,
/// you can simply dereference it (for example, *options.max_heap).
#[derive(Clone)]
pub struct HeapOption<T: Debug + Clone> {
    /// The actual value for the option
    value: T,
    /// The validator to ensure the value is valid.
    validator: fn(&T) -> bool,
    /// Can we set this option through env vars?
    from_env_var: bool,
    /// Can we set this option through command line options/API?
    from_command_line: bool,
}

impl<T: Debug + Clone> HeapOption<T> {
    /// Create a new HeapOption
    pub fn new(
        value: T,
        validator: fn(&T) -> bool,
        from_env_var: bool,
        from_command_line: bool,
    ) -> Self {
        HeapOption {
            value,
            validator,
            from_env_var,
            from_command_line,
        }
    }

    /// Set the option to the given value. Returns true if the value is valid, and we set the option to the value.
    pub fn set(&mut self, value: T) -> bool {
        if (self.validator)(&value) {
            self.value = value;
            return true;
        }
        false
    }
}

// Dereference an option to get its value.
impl<T: Debug + Clone> Deref for HeapOption<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

macro_rules! options {
    // Verify whether we can set an option through env var or command line.
    (@verify_set_from($self: expr, $key: expr, $verify_field: ident, $($name: ident),*)) => {
        match $key {
            $(stringify!($name) => { assert!($self.$name.$verify_field, "cannot set option {} (not {})", $key, stringify!($verify_field)) }),*
            _ => panic!("Invalid Options key: {}", $key)
        }
    };

    ($($(#[$outer:meta])*$name:ident: $type:ty [$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])*$name: $type [$validator] = $default),*);
    ];
    ($($(#[$outer:meta])*$name:ident: $type:ty [$validator:expr] = $default:expr),*) => [
        /// The typed set of heap parameters.
        #[derive(Clone)]
        pub struct Options {
            $($(#[$outer])*pub $name: HeapOption<$type>),*
        }
        impl Options {
            /// Set an option from env var
            pub fn set_from_env_var(&mut self, s: &str, val: &str) -> bool {
                options!(@verify_set_from(self, s, from_env_var, $($name),*));
                self.set_inner(s, val)
            }

            /// Set an option from command line
            pub fn set_from_command_line(&mut self, s: &str, val: &str) -> bool {
                options!(@verify_set_from(self, s, from_command_line, $($name),*));
                self.set_inner(s, val)
            }

            /// Bulk process options. Returns true if all the options are processed successfully.
            /// This method returns false if the option string is invalid, or if it includes any invalid option.
            ///
            /// Arguments:
            /// * `options`: a string that is key value pairs separated by white spaces or commas,
            ///   e.g. `max_heap=512M min_young_percent=10`, or `max_heap=512M,min_young_percent=10`
            pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
                for opt in options.replace(',', " ").split_ascii_whitespace() {
                    let kv_pair: Vec<&str> = opt.split('=').collect();
                    if kv_pair.len() != 2 {
                        return false;
                    }

                    let key = kv_pair[0];
                    let val = kv_pair[1];
                    if !self.set_from_command_line(key, val) {
                        return false;
                    }
                }

                true
            }

            /// Set an option and run its validator for its value.
            fn set_inner(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(typed_val) = val.parse::<$type>() {
                        let is_set = self.$name.set(typed_val);
                        if !is_set {
                            eprintln!("Warn: unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_set
                    } else {
                        eprintln!("Warn: unable to set {}={:?}. Can't parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }

            /// Create an `Options` instance with built-in default settings.
            fn new() -> Self {
                Options {
                    $($name: HeapOption::new($default, $validator, true, true)),*
                }
            }

            /// Read options from environment variables, and apply those settings to self.
            ///
            /// If we have environment variables that start with `GENGC_` and match any option
            /// (such as `GENGC_MAX_HEAP`), we set the option to its value (if it is a valid value).
            pub fn read_env_var_settings(&mut self) {
                const PREFIX: &str = "GENGC_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_env_var(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }

        impl Default for Options {
            /// By default, `Options` instance is created with built-in default settings.
            fn default() -> Self {
                Self::new()
            }
        }
    ]
}

fn valid_percent(v: &u8) -> bool {
    *v > 0 && *v < 100
}

options! {
    /// Upper bound of user-specified heap memory (`-Xmx`). The effective heap
    /// size accounts for the old generation being semi-spaced, so the
    /// address range actually reserved is larger than the young + one
    /// old semi-space that are usable at any time.
    max_heap: HeapSize [|v: &HeapSize| v.0 >= BYTES_IN_REGION] = HeapSize((memory::get_system_total_memory() as f64 * 0.5f64) as usize),
    /// Lower bound of user-specified heap memory (`-Xms`).
    min_heap: HeapSize [|v: &HeapSize| v.0 >= BYTES_IN_REGION] = HeapSize(32 << LOG_BYTES_IN_MBYTE),
    /// The share of the effective heap given to the young generation when the
    /// sizing policy operates in normal mode, in percent.
    young_percent_max: u8 [valid_percent] = 30,
    /// The floor for the young generation share (`-XX:MinYoungGenPercent`).
    /// The sizing policy reports out-of-memory rather than shrink the young
    /// generation below this share of the maximum heap.
    min_young_percent: u8 [valid_percent] = 5,
    /// An absolute floor for the young generation size, in bytes.
    min_young_size: HeapSize [always_valid] = HeapSize(4 << LOG_BYTES_IN_MBYTE),
    /// Quantum that generation sizes are rounded up to (`-XX:HeapAlignment`).
    heap_alignment: HeapSize [|v: &HeapSize| v.0.is_power_of_two()] = HeapSize(BYTES_IN_PAGE),
    /// When more than this share of the heap is free after a full GC, the
    /// sizing policy shrinks the heap.
    max_free_percent: u8 [valid_percent] = 40,
    /// The smallest heap resizing step the sizing policy will take.
    min_heap_delta: HeapSize [always_valid] = HeapSize(1 << LOG_BYTES_IN_MBYTE),
    /// Target size of the chunks the evacuator's promotion LAB is refilled with.
    lab_size: HeapSize [|v: &HeapSize| v.0 >= BYTES_IN_CARD] = HeapSize(256 << LOG_BYTES_IN_KBYTE),
    /// Cells larger than this bypass the promotion LAB and are allocated
    /// directly from to-space.
    lab_refill_threshold: HeapSize [always_valid] = HeapSize(4 << LOG_BYTES_IN_KBYTE),
    /// Size of the thread-local allocation buffers handed to the mutator.
    tlab_size: HeapSize [|v: &HeapSize| v.0 >= MIN_OBJECT_BYTES] = HeapSize(32 << LOG_BYTES_IN_KBYTE),
    /// Log remembered-set card walks (`-XX:TraceCardTableRSet`).
    trace_card_rset: bool [always_valid] = false,
    /// Log every cell the evacuator visits (`-XX:TraceEvacVisitedCell`).
    trace_evac_cell: bool [always_valid] = false,
}
