use std::sync::{Mutex, OnceLock};

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

/// Interned name. Every identifier, label, constructor name, and module
/// name that flows through the elaborator is a `Symbol`.
pub type Symbol = DefaultSymbol;

type Interner = StringInterner<DefaultBackend>;

static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();

fn with_interner<R>(f: impl FnOnce(&mut Interner) -> R) -> R {
    let mutex = INTERNER.get_or_init(|| Mutex::new(StringInterner::new()));
    let mut guard = mutex.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
}

/// Intern a string, returning its symbol.
pub fn intern(s: &str) -> Symbol {
    with_interner(|interner| interner.get_or_intern(s))
}

/// Resolve a symbol back to the interned string.
pub fn resolve(sym: Symbol) -> Option<String> {
    with_interner(|interner| interner.resolve(sym).map(|s| s.to_string()))
}

/// Resolve a symbol, falling back to a placeholder for display purposes.
pub fn name_of(sym: Symbol) -> String {
    resolve(sym).unwrap_or_else(|| "?".to_string())
}
