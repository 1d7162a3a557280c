// Runtime configuration
//
// The only setting the embedding environment can override from outside is the
// stack guard limit, through the PURE_STACK environment variable (kilobytes,
// 0 disables the guard).

pub const STACK_ENV_VAR: &str = "PURE_STACK";

// Default guard limit: 1 MB of native stack between instance creation and the
// deepest call/force entry. Test threads get 2 MB, the main thread usually 8.
pub const DEFAULT_STACK_MAX: usize = 1024 * 1024;

const DEFAULT_SHADOW_STACK_CAPACITY: usize = 64;
const DEFAULT_HEAP_CHUNK: usize = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum native stack usage in bytes before a `stack_fault` exception
    /// is raised. Zero disables the check.
    pub stack_max: usize,
    /// Initial number of shadow-stack slots.
    pub shadow_stack_capacity: usize,
    /// Number of term slots the heap reserves each time it grows.
    pub heap_chunk: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_max: DEFAULT_STACK_MAX,
            shadow_stack_capacity: DEFAULT_SHADOW_STACK_CAPACITY,
            heap_chunk: DEFAULT_HEAP_CHUNK,
        }
    }
}

impl RuntimeConfig {
    // Defaults plus whatever PURE_STACK says.
    pub fn from_env() -> Self {
        let setting = std::env::var(STACK_ENV_VAR).ok();
        Self::default().with_stack_setting(setting.as_deref())
    }

    // RUST CONCEPT: Taking Option<&str> keeps the parsing testable without
    // touching the process environment.
    pub fn with_stack_setting(mut self, setting: Option<&str>) -> Self {
        if let Some(text) = setting {
            match parse_stack_kb(text) {
                Some(bytes) => self.stack_max = bytes,
                None => log::warn!(
                    "ignoring {}={:?}: expected a size in kilobytes",
                    STACK_ENV_VAR,
                    text
                ),
            }
        }
        self
    }

    pub fn with_stack_max(mut self, bytes: usize) -> Self {
        self.stack_max = bytes;
        self
    }
}

fn parse_stack_kb(text: &str) -> Option<usize> {
    text.trim().parse::<usize>().ok()?.checked_mul(1024)
}
