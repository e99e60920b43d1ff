//! Flat infix arithmetic with simulated per-operator latency.
//!
//! Precedence is two-level only: every `*` and `/` is collapsed left to right
//! first, then the remaining `+` and `-` are reduced left to right. There are
//! no parentheses and no unary operators. Each binary application sleeps for
//! the configured cost of its operator before producing a value, so a single
//! evaluation occupies its task for the sum of those costs.

use std::collections::HashMap;
use std::time::Duration;

use crate::scheduler::OperationCosts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Subtract),
            '*' => Some(Operator::Multiply),
            '/' => Some(Operator::Divide),
            _ => None,
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Subtract => '-',
            Operator::Multiply => '*',
            Operator::Divide => '/',
        }
    }

    fn binds_tightly(&self) -> bool {
        matches!(self, Operator::Multiply | Operator::Divide)
    }
}

/// Delay to apply per operator symbol. Symbols without an entry run with no delay.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    delays: HashMap<char, Duration>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cost(mut self, symbol: char, delay: Duration) -> Self {
        self.delays.insert(symbol, delay);
        self
    }

    /// Build a table from stored job costs, one cost unit lasting `unit`.
    pub fn from_costs(costs: &OperationCosts, unit: Duration) -> Self {
        let mut table = Self::new();
        for symbol in ['+', '-', '*', '/'] {
            if let Some(units) = costs.units_for(symbol) {
                let units = u32::try_from(units).unwrap_or(u32::MAX);
                table.delays.insert(symbol, unit.saturating_mul(units));
            }
        }
        table
    }

    pub fn delay_for(&self, symbol: char) -> Option<Duration> {
        self.delays.get(&symbol).copied()
    }
}

/// Outcome of evaluating one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One line per binary application, in the order applied
    pub steps: Vec<String>,
    pub result: f64,
}

/// Split an operation into operands and operators, aligned so that
/// `operators[i]` sits between `operands[i]` and `operands[i + 1]`.
///
/// Operands are the non-empty substrings between operator characters. Surplus
/// operators and a trailing dangling operator are discarded.
pub fn tokenize(operation: &str) -> (Vec<f64>, Vec<Operator>) {
    let raw_operands: Vec<&str> = operation
        .split(|c: char| Operator::from_char(c).is_some())
        .filter(|s| !s.is_empty())
        .collect();
    let raw_operators: Vec<Operator> = operation.chars().filter_map(Operator::from_char).collect();

    let operands: Vec<f64> = raw_operands.iter().map(|s| parse_operand(s)).collect();
    let mut operators: Vec<Operator> = raw_operators.into_iter().take(operands.len()).collect();
    if !operands.is_empty() && operators.len() == operands.len() {
        let dropped = operators.pop();
        tracing::debug!(operation, dropped = ?dropped.map(|op| op.symbol()), "Dropping trailing operator");
    }

    (operands, operators)
}

fn parse_operand(raw: &str) -> f64 {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(operand = trimmed, "Operand is not a number, using 0");
            0.0
        }
    }
}

/// Evaluate `operation`, sleeping for each operator's cost before applying it.
pub async fn evaluate(operation: &str, costs: &CostTable) -> Evaluation {
    let (mut operands, mut operators) = tokenize(operation);
    let mut steps = Vec::with_capacity(operators.len());

    if operands.is_empty() {
        return Evaluation { steps, result: 0.0 };
    }

    // Multiplication and division first, collapsing in place.
    let mut i = 0;
    while i < operators.len() {
        if operators[i].binds_tightly() {
            let (left, right) = (operands[i], operands[i + 1]);
            let value = apply(left, right, operators[i], costs).await;
            steps.push(format_step(left, operators[i], right, value));
            operands[i] = value;
            operands.remove(i + 1);
            operators.remove(i);
        } else {
            i += 1;
        }
    }

    let mut result = operands[0];
    for (op, right) in operators.iter().zip(operands.iter().skip(1)) {
        let value = apply(result, *right, *op, costs).await;
        steps.push(format_step(result, *op, *right, value));
        result = value;
    }

    Evaluation { steps, result }
}

async fn apply(left: f64, right: f64, op: Operator, costs: &CostTable) -> f64 {
    match costs.delay_for(op.symbol()) {
        Some(delay) => {
            tracing::debug!(operator = %op.symbol(), delay = ?delay, "Performing operation");
            tokio::time::sleep(delay).await;
        }
        None => tracing::debug!(operator = %op.symbol(), "No cost configured, no delay applied"),
    }

    match op {
        Operator::Add => left + right,
        Operator::Subtract => left - right,
        Operator::Multiply => left * right,
        Operator::Divide => {
            if right == 0.0 {
                tracing::warn!(left, "Division by zero, result recorded as 0");
                0.0
            } else {
                left / right
            }
        }
    }
}

fn format_step(left: f64, op: Operator, right: f64, value: f64) -> String {
    format!("{:.6} {} {:.6} = {:.6}", left, op.symbol(), right, value)
}
