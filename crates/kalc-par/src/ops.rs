//! The binary operator table.
//!
//! A mutable registry mapping single-character operators to their
//! associativity and precedence. The parser consults it for precedence
//! climbing and extends it when a `binary` prototype is parsed; the
//! evaluator resets it together with the module so that replaying a
//! declaration history reinstalls user operators in their original order.

use std::collections::HashMap;

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

/// Associativity and precedence of a registered operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorInfo {
    pub associativity: Associativity,
    pub precedence: i32,
}

impl OperatorInfo {
    /// A left-associative operator with the given precedence.
    pub fn left(precedence: i32) -> Self {
        Self {
            associativity: Associativity::Left,
            precedence,
        }
    }

    /// A right-associative operator with the given precedence.
    pub fn right(precedence: i32) -> Self {
        Self {
            associativity: Associativity::Right,
            precedence,
        }
    }
}

/// Precedence used for user-defined binary operators that do not specify
/// one.
pub const DEFAULT_PRECEDENCE: i32 = 30;

/// Lowest and highest precedence a user-defined operator may declare.
pub const PRECEDENCE_RANGE: std::ops::RangeInclusive<i32> = 1..=100;

/// The mutable operator registry.
///
/// Non-operators report precedence −1, which terminates a precedence
/// climb.
#[derive(Debug, Clone)]
pub struct OperatorTable {
    operators: HashMap<char, OperatorInfo>,
}

impl OperatorTable {
    /// Creates a table holding the built-in operators.
    ///
    /// `=` is installed right-associative at precedence 2 so that chained
    /// assignment parses right-to-left; everything else is
    /// left-associative.
    pub fn new() -> Self {
        let mut table = Self {
            operators: HashMap::new(),
        };
        // lowest precedence
        table.install('=', OperatorInfo::right(2));
        table.install('<', OperatorInfo::left(10));
        table.install('+', OperatorInfo::left(20));
        table.install('-', OperatorInfo::left(20));
        table.install('*', OperatorInfo::left(40));
        // highest precedence
        table
    }

    /// Registers (or replaces) `op`.
    pub fn install(&mut self, op: char, info: OperatorInfo) {
        self.operators.insert(op, info);
    }

    /// Returns the registration for `op`, if any.
    pub fn get(&self, op: char) -> Option<OperatorInfo> {
        self.operators.get(&op).copied()
    }

    /// Returns the precedence of `op`, or −1 for non-operators.
    pub fn precedence(&self, op: char) -> i32 {
        self.operators.get(&op).map_or(-1, |info| info.precedence)
    }

    /// Returns `true` if `op` is registered as right-associative.
    pub fn is_right_associative(&self, op: char) -> bool {
        self.operators
            .get(&op)
            .is_some_and(|info| info.associativity == Associativity::Right)
    }
}

impl Default for OperatorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_precedences() {
        let table = OperatorTable::new();
        assert_eq!(table.precedence('<'), 10);
        assert_eq!(table.precedence('+'), 20);
        assert_eq!(table.precedence('-'), 20);
        assert_eq!(table.precedence('*'), 40);
        assert_eq!(table.precedence('='), 2);
    }

    #[test]
    fn test_non_operator_is_negative() {
        let table = OperatorTable::new();
        assert_eq!(table.precedence('%'), -1);
        assert_eq!(table.precedence('('), -1);
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let table = OperatorTable::new();
        assert!(table.is_right_associative('='));
        assert!(!table.is_right_associative('+'));
        assert!(!table.is_right_associative('%'));
    }

    #[test]
    fn test_install_user_operator() {
        let mut table = OperatorTable::new();
        table.install('%', OperatorInfo::left(DEFAULT_PRECEDENCE));
        assert_eq!(table.precedence('%'), 30);
        table.install('%', OperatorInfo::left(42));
        assert_eq!(table.precedence('%'), 42);
    }
}
