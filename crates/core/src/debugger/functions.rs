//! User-defined and built-in debugger functions.
//!
//! A function is a named, compiled [`Expression`] plus the source text it was
//! compiled from. Parsing user text is the command parser's job; this module
//! only stores results and ships the built-in input/switch tests.

use std::collections::BTreeMap;

use crate::{INPT4, INPT5, SWCHA, SWCHB};

/// Compiled debugger expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// Evaluates to 0
    Empty,
    Constant(i32),
    /// `*addr`: byte read through the host bus
    ByteDeref(u16),
    /// `!e`
    LogicalNot(Box<Expression>),
    /// `a & b`
    BitAnd(Box<Expression>, Box<Expression>),
    /// `a | b`
    BitOr(Box<Expression>, Box<Expression>),
    /// `a == b`
    Equals(Box<Expression>, Box<Expression>),
}

static EMPTY: Expression = Expression::Empty;

impl Expression {
    pub fn evaluate(&self, peek: &mut dyn FnMut(u16) -> u8) -> i32 {
        match self {
            Expression::Empty => 0,
            Expression::Constant(v) => *v,
            Expression::ByteDeref(addr) => peek(*addr) as i32,
            Expression::LogicalNot(e) => (e.evaluate(peek) == 0) as i32,
            Expression::BitAnd(a, b) => a.evaluate(peek) & b.evaluate(peek),
            Expression::BitOr(a, b) => a.evaluate(peek) | b.evaluate(peek),
            Expression::Equals(a, b) => (a.evaluate(peek) == b.evaluate(peek)) as i32,
        }
    }
}

// `*reg & mask`
fn bit_test(reg: u16, mask: i32) -> Expression {
    Expression::BitAnd(Box::new(Expression::ByteDeref(reg)), Box::new(Expression::Constant(mask)))
}

// `!(*reg & mask)`
fn bit_clear(reg: u16, mask: i32) -> Expression {
    Expression::LogicalNot(Box::new(bit_test(reg, mask)))
}

/// Built-in function: name, definition, help, compiled form.
struct Builtin {
    name: &'static str,
    definition: &'static str,
    help: &'static str,
    reg: u16,
    mask: i32,
    /// True for `!(*reg & mask)`, false for `*reg & mask`
    active_low: bool,
}

const fn b(name: &'static str, definition: &'static str, help: &'static str, reg: u16, mask: i32, active_low: bool) -> Builtin {
    Builtin { name, definition, help, reg, mask, active_low }
}

static BUILTINS: [Builtin; 18] = [
    // left joystick
    b("_joy0left", "!(*SWCHA & $40)", "Left joystick moved left", SWCHA, 0x40, true),
    b("_joy0right", "!(*SWCHA & $80)", "Left joystick moved right", SWCHA, 0x80, true),
    b("_joy0up", "!(*SWCHA & $10)", "Left joystick moved up", SWCHA, 0x10, true),
    b("_joy0down", "!(*SWCHA & $20)", "Left joystick moved down", SWCHA, 0x20, true),
    b("_joy0button", "!(*INPT4 & $80)", "Left joystick button pressed", INPT4, 0x80, true),
    // right joystick
    b("_joy1left", "!(*SWCHA & $04)", "Right joystick moved left", SWCHA, 0x04, true),
    b("_joy1right", "!(*SWCHA & $08)", "Right joystick moved right", SWCHA, 0x08, true),
    b("_joy1up", "!(*SWCHA & $01)", "Right joystick moved up", SWCHA, 0x01, true),
    b("_joy1down", "!(*SWCHA & $02)", "Right joystick moved down", SWCHA, 0x02, true),
    b("_joy1button", "!(*INPT5 & $80)", "Right joystick button pressed", INPT5, 0x80, true),
    // console switches
    b("_select", "!(*SWCHB & $02)", "Game Select pressed", SWCHB, 0x02, true),
    b("_reset", "!(*SWCHB & $01)", "Game Reset pressed", SWCHB, 0x01, true),
    b("_color", "*SWCHB & $08", "Color/BW set to Color", SWCHB, 0x08, false),
    b("_bw", "!(*SWCHB & $08)", "Color/BW set to BW", SWCHB, 0x08, true),
    b("_diff0b", "!(*SWCHB & $40)", "Left diff. set to B (easy)", SWCHB, 0x40, true),
    b("_diff0a", "*SWCHB & $40", "Left diff. set to A (hard)", SWCHB, 0x40, false),
    b("_diff1b", "!(*SWCHB & $80)", "Right diff. set to B (easy)", SWCHB, 0x80, true),
    b("_diff1a", "*SWCHB & $80", "Right diff. set to A (hard)", SWCHB, 0x80, false),
];

/// Names resolved by the command parser rather than by a function.
pub const PSEUDO_REGISTERS: [(&str, &str); 7] = [
    ("_bank", "Currently selected bank"),
    ("_rwport", "Address at which a read from a write port occurred"),
    ("_scan", "Current scanline count"),
    ("_fcount", "Number of frames since emulation started"),
    ("_cclocks", "Color clocks on current scanline"),
    ("_vsync", "Whether vertical sync is enabled (1 or 0)"),
    ("_vblank", "Whether vertical blank is enabled (1 or 0)"),
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.iter().any(|f| f.name == name)
}

struct Function {
    expression: Expression,
    definition: String,
}

/// Name → function table, seeded with the built-ins.
pub struct FunctionRegistry {
    functions: BTreeMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = FunctionRegistry { functions: BTreeMap::new() };
        for f in BUILTINS.iter() {
            let expression = if f.active_low { bit_clear(f.reg, f.mask) } else { bit_test(f.reg, f.mask) };
            registry.add(f.name, f.definition, expression);
        }
        registry
    }

    /// Register a function. An existing name is left untouched and the call
    /// returns false.
    pub fn add(&mut self, name: &str, definition: &str, expression: Expression) -> bool {
        if self.functions.contains_key(name) {
            return false;
        }
        self.functions.insert(name.to_string(), Function { expression, definition: definition.to_string() });
        true
    }

    /// Remove a user function. Built-ins and unknown names return false.
    pub fn remove(&mut self, name: &str) -> bool {
        if is_builtin(name) {
            return false;
        }
        self.functions.remove(name).is_some()
    }

    /// Compiled expression, or [`Expression::Empty`] for an unknown name.
    pub fn get(&self, name: &str) -> &Expression {
        self.functions.get(name).map(|f| &f.expression).unwrap_or(&EMPTY)
    }

    /// Source text, or "" for an unknown name.
    pub fn definition(&self, name: &str) -> &str {
        self.functions.get(name).map(|f| f.definition.as_str()).unwrap_or("")
    }

    /// (name, definition) of every function, sorted by name.
    pub fn definitions(&self) -> Vec<(String, String)> {
        self.functions.iter().map(|(n, f)| (n.clone(), f.definition.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function and pseudo-register names starting with `prefix`, ignoring
    /// case.
    pub fn completions(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_ascii_lowercase();
        let matches = |name: &str| name.to_ascii_lowercase().starts_with(&prefix);

        let mut list: Vec<String> = self.functions.keys().filter(|n| matches(n.as_str())).cloned().collect();
        list.extend(PSEUDO_REGISTERS.iter().filter(|(n, _)| matches(n)).map(|(n, _)| n.to_string()));
        list
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Aligned listing of the built-in functions and pseudo-registers.
pub fn builtin_help() -> String {
    let name_w = BUILTINS.iter().map(|f| f.name.len()).max().unwrap_or(0);
    let def_w = BUILTINS.iter().map(|f| f.definition.len()).max().unwrap_or(0);

    let mut s = String::from("\nBuilt-in functions:\n");
    for f in BUILTINS.iter() {
        s.push_str(&format!("{:<name_w$} {{{:<def_w$}}}  {}\n", f.name, f.definition, f.help));
    }

    let reg_w = PSEUDO_REGISTERS.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
    s.push_str("\nPseudo-registers:\n");
    for (name, help) in PSEUDO_REGISTERS.iter() {
        s.push_str(&format!("{:<reg_w$}  {}\n", name, help));
    }
    s
}
