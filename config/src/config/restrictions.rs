// src/config/restrictions.rs
// Cross-field checks written as small expressions over dotted paths, e.g.
// `task.train_data.is_training != None` or `task.model.min_level <= task.model.max_level`.

use crate::config::overrides::get_path;
use crate::error::{Error, Result};
use serde_yaml::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl Op {
  // At equal positions `parse` prefers the longer spelling, so `<=` is not read as `<`.
  const SPELLINGS: [(&'static str, Op); 6] = [
    ("==", Op::Eq),
    ("!=", Op::Ne),
    ("<=", Op::Le),
    (">=", Op::Ge),
    ("<", Op::Lt),
    (">", Op::Gt),
  ];
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
  None,
  Literal(Value),
  Path(String),
}

/// A parsed restriction, checked against a manifest tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Restriction {
  text: String,
  lhs: Operand,
  op: Op,
  rhs: Operand,
}

impl Restriction {
  pub fn parse(text: &str) -> Result<Self> {
    let (position, spelling, op) = Op::SPELLINGS
      .iter()
      .filter_map(|(spelling, op)| text.find(spelling).map(|pos| (pos, *spelling, *op)))
      .min_by_key(|(pos, spelling, _)| (*pos, usize::MAX - spelling.len()))
      .ok_or_else(|| Error::RestrictionViolated {
        restriction: text.to_string(),
        detail: "No comparison operator found.".to_string(),
      })?;

    let lhs = parse_operand(text, &text[..position])?;
    let rhs = parse_operand(text, &text[position + spelling.len()..])?;
    Ok(Restriction {
      text: text.trim().to_string(),
      lhs,
      op,
      rhs,
    })
  }

  /// Evaluates the restriction; a path that does not exist resolves to `None`.
  pub fn check(&self, tree: &Value) -> Result<()> {
    let lhs = resolve(&self.lhs, tree);
    let rhs = resolve(&self.rhs, tree);
    let holds = match self.op {
      Op::Eq => values_equal(&lhs, &rhs),
      Op::Ne => !values_equal(&lhs, &rhs),
      ordering => match compare(&lhs, &rhs) {
        Some(order) => match ordering {
          Op::Lt => order == Ordering::Less,
          Op::Le => order != Ordering::Greater,
          Op::Gt => order == Ordering::Greater,
          _ => order != Ordering::Less,
        },
        None => {
          return Err(Error::RestrictionViolated {
            restriction: self.text.clone(),
            detail: format!(
              "Cannot order {} and {}.",
              describe(&lhs),
              describe(&rhs)
            ),
          })
        }
      },
    };

    if holds {
      Ok(())
    } else {
      Err(Error::RestrictionViolated {
        restriction: self.text.clone(),
        detail: format!(
          "left side is {}, right side is {}.",
          describe(&lhs),
          describe(&rhs)
        ),
      })
    }
  }
}

impl fmt::Display for Restriction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}

/// Parses and checks every restriction against `tree`, stopping at the first violation.
pub fn check_restrictions(tree: &Value, restrictions: &[String]) -> Result<()> {
  for text in restrictions {
    Restriction::parse(text)?.check(tree)?;
  }
  Ok(())
}

fn parse_operand(restriction: &str, text: &str) -> Result<Operand> {
  let text = text.trim();
  if text.is_empty() {
    return Err(Error::RestrictionViolated {
      restriction: restriction.to_string(),
      detail: "Missing operand.".to_string(),
    });
  }
  if text == "None" || text == "null" {
    return Ok(Operand::None);
  }
  let starts_like_path = text
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
  let is_keyword = matches!(text, "true" | "false" | "True" | "False");
  if starts_like_path && !is_keyword {
    return Ok(Operand::Path(text.to_string()));
  }
  let literal = match text {
    "True" => Value::Bool(true),
    "False" => Value::Bool(false),
    _ => serde_yaml::from_str(text).map_err(|e| Error::RestrictionViolated {
      restriction: restriction.to_string(),
      detail: format!("Cannot parse operand '{}': {}", text, e),
    })?,
  };
  Ok(Operand::Literal(literal))
}

fn resolve(operand: &Operand, tree: &Value) -> Value {
  match operand {
    Operand::None => Value::Null,
    Operand::Literal(value) => value.clone(),
    Operand::Path(path) => get_path(tree, path).cloned().unwrap_or(Value::Null),
  }
}

fn values_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
  }
}

fn describe(value: &Value) -> String {
  match value {
    Value::Null => "None".to_string(),
    other => serde_yaml::to_string(other)
      .map(|s| s.trim_end().to_string())
      .unwrap_or_else(|_| format!("{:?}", other)),
  }
}
