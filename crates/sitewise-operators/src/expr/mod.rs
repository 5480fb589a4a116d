//! Scalar expression trees with choice nodes.
//!
//! An `Expr` is immutable. `bind` replaces every choice node with the
//! concrete expression its binding selects; `evaluate` additionally folds the
//! result down to a literal where possible. Only choice-free expressions can
//! be lowered to the compute engine (`to_compute`).
//!
//! Choice nodes:
//! - `Any`: pick one of `choices` by an `Index` binding.
//! - `Val`: a hole replaced by an Int/Float/Bool/String literal; `domain`
//!   (`domain(col)`) says where the legal values come from.
//! - `Multi`: `child` repeated once per sub-map of a `Multi` binding,
//!   producing a `List`.

mod eval;
mod lower;
mod render;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sitewise_core::binding::{Binding, BindingMap};
use sitewise_core::types::{RowBatch, Scalar};

use crate::traits::{OpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    In,
    Between,
    Not,
    And,
    Or,
}

impl Operator {
    /// Resolve an operator from its textual symbol and operand count.
    pub fn from_symbol(symbol: &str, arity: usize) -> Option<Operator> {
        let op = match (symbol, arity) {
            ("-", 1) => Operator::Neg,
            ("+", 2) => Operator::Add,
            ("-", 2) => Operator::Sub,
            ("*", 2) => Operator::Mul,
            ("/", 2) => Operator::Div,
            ("^", 2) => Operator::Pow,
            ("=", 2) => Operator::Eq,
            ("!=", 2) => Operator::Ne,
            (">=", 2) => Operator::Ge,
            (">", 2) => Operator::Gt,
            ("<=", 2) => Operator::Le,
            ("<", 2) => Operator::Lt,
            ("in", 2) => Operator::In,
            ("between", 3) => Operator::Between,
            ("not", 1) => Operator::Not,
            ("and", 2) => Operator::And,
            ("or", 2) => Operator::Or,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Neg | Operator::Sub => "-",
            Operator::Add => "+",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Pow => "^",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Ge => ">=",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Lt => "<",
            Operator::In => "in",
            Operator::Between => "between",
            Operator::Not => "not",
            Operator::And => "and",
            Operator::Or => "or",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Operator::Neg | Operator::Not => 1,
            Operator::Between => 3,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListExpr {
    pub begin: String,
    pub end: String,
    pub delim: String,
    pub elements: Vec<Expr>,
}

impl ListExpr {
    pub fn bracketed(elements: Vec<Expr>) -> Self {
        Self {
            begin: "[".into(),
            end: "]".into(),
            delim: ",".into(),
            elements,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    IntConst(i64),
    FloatConst(f64),
    BoolConst(bool),
    StringConst(String),
    ColumnRef {
        column: String,
        table: String,
    },
    Op {
        op: Operator,
        operands: Vec<Expr>,
    },
    Func {
        name: String,
        args: Vec<Expr>,
    },
    List(ListExpr),
    Any {
        id: String,
        choices: Vec<Expr>,
    },
    Val {
        id: String,
        domain: Box<Expr>,
    },
    Multi {
        id: String,
        begin: String,
        end: String,
        delim: String,
        child: Box<Expr>,
    },
}

/// Descriptor of a choice node, as collected by `collect_choice_nodes`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceNode {
    /// `AnyExpr` / plan-level alternatives: legal values are `Index(0..arity)`.
    Any { id: String, arity: usize },
    /// `ValExpr`: legal values are the distinct values of `domain`.
    Val { id: String, domain: Expr },
}

impl ChoiceNode {
    pub fn id(&self) -> &str {
        match self {
            ChoiceNode::Any { id, .. } | ChoiceNode::Val { id, .. } => id,
        }
    }

    /// `(column, table)` named by a `domain(col)` function.
    pub fn domain_column(&self) -> Result<(&str, &str)> {
        match self {
            ChoiceNode::Val {
                domain: Expr::Func { name, args },
                id,
            } if name == "domain" => match args.first() {
                Some(Expr::ColumnRef { column, table }) => Ok((column.as_str(), table.as_str())),
                _ => Err(OpError::Unsupported(format!(
                    "domain of '{id}' does not name a column"
                ))),
            },
            other => Err(OpError::Unsupported(format!(
                "domain of '{}' is not a domain function",
                other.id()
            ))),
        }
    }

    /// SQL statement enumerating a `Val` domain.
    pub fn domain_query(&self) -> Result<String> {
        let (column, table) = self.domain_column()?;
        Ok(format!("SELECT DISTINCT {column} FROM {table}"))
    }

    /// Legal values that need no external lookup. `None` for `Val`.
    pub fn local_choices(&self) -> Option<Vec<Binding>> {
        match self {
            ChoiceNode::Any { arity, .. } => {
                Some((0..*arity as i64).map(Binding::Index).collect())
            }
            ChoiceNode::Val { .. } => None,
        }
    }

    /// Turn the first column of a domain query result into bindings.
    pub fn choices_from_domain(table: &RowBatch) -> Result<Vec<Binding>> {
        let Some(col) = table.columns.first() else {
            return Ok(Vec::new());
        };
        col.values
            .iter()
            .map(|v| match v {
                Scalar::I64(i) => Ok(Binding::Int(*i)),
                Scalar::F64(f) => Ok(Binding::Float(*f)),
                Scalar::Str(s) => Ok(Binding::String(s.clone())),
                Scalar::Bool(b) => Ok(Binding::Bool(*b)),
                Scalar::Null => Err(OpError::Type(format!(
                    "null value in domain column '{}'",
                    col.name
                ))),
            })
            .collect()
    }
}

/// Choice id -> descriptor, sorted by id.
pub type ChoiceNodes = BTreeMap<String, ChoiceNode>;

impl Expr {
    pub fn column(column: impl Into<String>) -> Self {
        Expr::ColumnRef {
            column: column.into(),
            table: String::new(),
        }
    }

    pub fn op(op: Operator, operands: Vec<Expr>) -> Self {
        Expr::Op { op, operands }
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Func {
            name: name.into(),
            args,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::IntConst(_) | Expr::FloatConst(_) | Expr::BoolConst(_) | Expr::StringConst(_)
        )
    }

    /// Literal value of a folded expression.
    pub fn to_scalar(&self) -> Result<Scalar> {
        match self {
            Expr::IntConst(v) => Ok(Scalar::I64(*v)),
            Expr::FloatConst(v) => Ok(Scalar::F64(*v)),
            Expr::BoolConst(v) => Ok(Scalar::Bool(*v)),
            Expr::StringConst(v) => Ok(Scalar::Str(v.clone())),
            Expr::ColumnRef { column, .. } => Err(OpError::Unsupported(format!(
                "column reference '{column}' has no scalar value"
            ))),
            other => Err(OpError::Type(format!("'{other}' is not a literal"))),
        }
    }

    fn children(&self) -> &[Expr] {
        match self {
            Expr::Op { operands, .. } => operands,
            Expr::Func { args, .. } => args,
            Expr::List(list) => &list.elements,
            Expr::Any { choices, .. } => choices,
            _ => &[],
        }
    }

    /// True when no choice node remains anywhere in the tree.
    pub fn is_bound(&self) -> bool {
        match self {
            Expr::Any { .. } | Expr::Val { .. } | Expr::Multi { .. } => false,
            other => other.children().iter().all(Expr::is_bound),
        }
    }

    /// Replace every choice node by what `binding` selects.
    pub fn bind(&self, binding: &BindingMap) -> Result<Expr> {
        let out = match self {
            Expr::IntConst(_)
            | Expr::FloatConst(_)
            | Expr::BoolConst(_)
            | Expr::StringConst(_)
            | Expr::ColumnRef { .. } => self.clone(),
            Expr::Op { op, operands } => Expr::Op {
                op: *op,
                operands: bind_all(operands, binding)?,
            },
            Expr::Func { name, args } => Expr::Func {
                name: name.clone(),
                args: bind_all(args, binding)?,
            },
            Expr::List(list) => Expr::List(ListExpr {
                begin: list.begin.clone(),
                end: list.end.clone(),
                delim: list.delim.clone(),
                elements: bind_all(&list.elements, binding)?,
            }),
            Expr::Any { id, choices } => select_choice(id, choices, binding)?.bind(binding)?,
            Expr::Val { id, .. } => literal_from_binding(id, binding)?,
            Expr::Multi {
                id,
                begin,
                end,
                delim,
                child,
            } => {
                let subs = binding.get(id)?.sub_bindings()?;
                let elements = subs
                    .iter()
                    .map(|sub| child.bind(sub))
                    .collect::<Result<Vec<_>>>()?;
                Expr::List(ListExpr {
                    begin: begin.clone(),
                    end: end.clone(),
                    delim: delim.clone(),
                    elements,
                })
            }
        };
        Ok(out)
    }

    /// Copy into `useful` exactly the bindings this expression reads.
    pub fn pick_useful_binding(&self, binding: &BindingMap, useful: &mut BindingMap) -> Result<()> {
        match self {
            Expr::Any { id, choices } => {
                useful.copy_from(binding, id)?;
                select_choice(id, choices, binding)?.pick_useful_binding(binding, useful)
            }
            Expr::Val { id, .. } | Expr::Multi { id, .. } => Ok(useful.copy_from(binding, id)?),
            other => {
                for child in other.children() {
                    child.pick_useful_binding(binding, useful)?;
                }
                Ok(())
            }
        }
    }

    /// Record every reachable choice node. `Multi` templates cannot be
    /// enumerated and are rejected.
    pub fn collect_choice_nodes(&self, out: &mut ChoiceNodes) -> Result<()> {
        match self {
            Expr::Any { id, choices } => {
                out.insert(
                    id.clone(),
                    ChoiceNode::Any {
                        id: id.clone(),
                        arity: choices.len(),
                    },
                );
                for c in choices {
                    c.collect_choice_nodes(out)?;
                }
                Ok(())
            }
            Expr::Val { id, domain } => {
                out.insert(
                    id.clone(),
                    ChoiceNode::Val {
                        id: id.clone(),
                        domain: (**domain).clone(),
                    },
                );
                Ok(())
            }
            Expr::Multi { id, .. } => Err(OpError::Unsupported(format!(
                "cannot enumerate choices of multi expression '{id}'"
            ))),
            other => {
                for child in other.children() {
                    child.collect_choice_nodes(out)?;
                }
                Ok(())
            }
        }
    }
}

fn bind_all(exprs: &[Expr], binding: &BindingMap) -> Result<Vec<Expr>> {
    exprs.iter().map(|e| e.bind(binding)).collect()
}

pub(crate) fn select_choice<'a>(
    id: &str,
    choices: &'a [Expr],
    binding: &BindingMap,
) -> Result<&'a Expr> {
    let idx = binding.get(id)?.get_index()?;
    usize::try_from(idx)
        .ok()
        .and_then(|i| choices.get(i))
        .ok_or_else(|| {
            OpError::Binding(format!(
                "index {idx} out of range for '{id}' with {} choices",
                choices.len()
            ))
        })
}

pub(crate) fn literal_from_binding(id: &str, binding: &BindingMap) -> Result<Expr> {
    match binding.get(id)? {
        Binding::Int(v) => Ok(Expr::IntConst(*v)),
        Binding::Float(v) => Ok(Expr::FloatConst(*v)),
        Binding::Bool(v) => Ok(Expr::BoolConst(*v)),
        Binding::String(v) => Ok(Expr::StringConst(v.clone())),
        other => Err(OpError::Binding(format!(
            "{} binding cannot fill value hole '{id}'",
            other.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_col() -> Expr {
        Expr::Any {
            id: "c".into(),
            choices: vec![Expr::column("a"), Expr::column("b")],
        }
    }

    fn val(id: &str) -> Expr {
        Expr::Val {
            id: id.into(),
            domain: Box::new(Expr::func(
                "domain",
                vec![Expr::ColumnRef {
                    column: "x".into(),
                    table: "t".into(),
                }],
            )),
        }
    }

    #[test]
    fn operator_table() {
        assert_eq!(Operator::from_symbol("-", 1), Some(Operator::Neg));
        assert_eq!(Operator::from_symbol("-", 2), Some(Operator::Sub));
        assert_eq!(Operator::from_symbol("between", 3), Some(Operator::Between));
        assert_eq!(Operator::from_symbol("between", 2), None);
        assert_eq!(Operator::from_symbol("xor", 2), None);
    }

    #[test]
    fn bind_resolves_every_choice_kind() {
        let e = Expr::op(
            Operator::And,
            vec![
                Expr::op(Operator::Gt, vec![any_col(), val("v")]),
                Expr::op(
                    Operator::In,
                    vec![
                        Expr::column("k"),
                        Expr::Multi {
                            id: "m".into(),
                            begin: "(".into(),
                            end: ")".into(),
                            delim: ",".into(),
                            child: Box::new(val("item")),
                        },
                    ],
                ),
            ],
        );
        let sub = |i: i64| BindingMap::from([("item", Binding::Int(i))]);
        let b = BindingMap::from([
            ("c", Binding::Index(1)),
            ("v", Binding::Float(2.5)),
            ("m", Binding::Multi(vec![sub(1), sub(2)])),
        ]);
        let bound = e.bind(&b).unwrap();
        assert!(bound.is_bound());
        let mut nodes = ChoiceNodes::new();
        bound.collect_choice_nodes(&mut nodes).unwrap();
        assert!(nodes.is_empty());
        assert_eq!(bound.to_string(), "b > 2.5 and k in (1,2)");
    }

    #[test]
    fn any_index_out_of_range() {
        let b = BindingMap::from([("c", Binding::Index(5))]);
        assert!(matches!(any_col().bind(&b), Err(OpError::Binding(_))));
    }

    #[test]
    fn val_rejects_index_binding() {
        let b = BindingMap::from([("v", Binding::Index(0))]);
        assert!(matches!(val("v").bind(&b), Err(OpError::Binding(_))));
    }

    #[test]
    fn useful_binding_is_a_subset() {
        let e = Expr::op(Operator::Add, vec![any_col(), val("v")]);
        let b = BindingMap::from([
            ("c", Binding::Index(0)),
            ("v", Binding::Int(3)),
            ("unused", Binding::Bool(true)),
        ]);
        let mut useful = BindingMap::new();
        e.pick_useful_binding(&b, &mut useful).unwrap();
        assert_eq!(useful.len(), 2);
        assert!(!useful.contains("unused"));

        let mut again = BindingMap::new();
        e.pick_useful_binding(&useful, &mut again).unwrap();
        assert_eq!(again, useful);
    }

    #[test]
    fn useful_binding_skips_unselected_alternatives() {
        let e = Expr::Any {
            id: "c".into(),
            choices: vec![val("v0"), val("v1")],
        };
        let b = BindingMap::from([
            ("c", Binding::Index(1)),
            ("v0", Binding::Int(1)),
            ("v1", Binding::Int(2)),
        ]);
        let mut useful = BindingMap::new();
        e.pick_useful_binding(&b, &mut useful).unwrap();
        assert_eq!(
            useful,
            BindingMap::from([("c", Binding::Index(1)), ("v1", Binding::Int(2))])
        );
        // The unselected alternative's id need not be bound at all.
        let partial = BindingMap::from([("c", Binding::Index(1)), ("v1", Binding::Int(2))]);
        let mut again = BindingMap::new();
        e.pick_useful_binding(&partial, &mut again).unwrap();
        assert_eq!(again, useful);
    }

    #[test]
    fn choice_collection() {
        let e = Expr::op(Operator::Add, vec![any_col(), val("v")]);
        let mut nodes = ChoiceNodes::new();
        e.collect_choice_nodes(&mut nodes).unwrap();
        assert_eq!(
            nodes.get("c"),
            Some(&ChoiceNode::Any {
                id: "c".into(),
                arity: 2
            })
        );
        assert_eq!(
            nodes.get("v").unwrap().domain_query().unwrap(),
            "SELECT DISTINCT x FROM t"
        );
        assert_eq!(
            nodes.get("c").unwrap().local_choices().unwrap(),
            vec![Binding::Index(0), Binding::Index(1)]
        );
    }

    #[test]
    fn multi_cannot_be_enumerated() {
        let e = Expr::Multi {
            id: "m".into(),
            begin: "[".into(),
            end: "]".into(),
            delim: ",".into(),
            child: Box::new(Expr::IntConst(1)),
        };
        let mut nodes = ChoiceNodes::new();
        assert!(matches!(
            e.collect_choice_nodes(&mut nodes),
            Err(OpError::Unsupported(_))
        ));
    }
}
