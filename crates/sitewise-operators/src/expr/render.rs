//! Textual forms of an expression.
//!
//! `Display` is the explain form used in plan renderings (string literals are
//! written raw). `to_sql` is the same text with string literals quoted, used
//! when a bound subtree is pushed to the SQL backend.

use std::fmt::{self, Write};

use super::{Expr, Operator};

impl Expr {
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = write_expr(self, &mut out, true);
        out
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(self, f, false)
    }
}

fn write_expr<W: Write>(e: &Expr, w: &mut W, sql: bool) -> fmt::Result {
    match e {
        Expr::IntConst(v) => write!(w, "{v}"),
        Expr::FloatConst(v) => write!(w, "{v}"),
        Expr::BoolConst(v) => write!(w, "{v}"),
        Expr::StringConst(v) if sql => write!(w, "'{}'", v.replace('\'', "''")),
        Expr::StringConst(v) => write!(w, "{v}"),
        Expr::ColumnRef { column, .. } => write!(w, "{column}"),
        Expr::Op { op, operands } => write_op(*op, operands, w, sql),
        Expr::Func { name, args } => {
            if name == "int" && args.len() == 1 {
                write!(w, "CAST(")?;
                write_expr(&args[0], w, sql)?;
                return write!(w, " AS INTEGER)");
            }
            write!(w, "{name}(")?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                write_expr(a, w, sql)?;
            }
            if name == "count" && args.is_empty() {
                write!(w, "*")?;
            }
            write!(w, ")")
        }
        Expr::List(list) => {
            write!(w, "{}", list.begin)?;
            for (i, elem) in list.elements.iter().enumerate() {
                if i > 0 {
                    write!(w, "{}", list.delim)?;
                }
                write_expr(elem, w, sql)?;
            }
            write!(w, "{}", list.end)
        }
        Expr::Any { id, choices } => {
            write!(w, "ANY[{id}]{{ ")?;
            for c in choices {
                write_expr(c, w, sql)?;
                write!(w, ", ")?;
            }
            write!(w, " }}")
        }
        Expr::Val { id, domain } => {
            write!(w, "VAL[{id}]{{ ")?;
            write_expr(domain, w, sql)?;
            write!(w, " }}")
        }
        Expr::Multi { id, child, .. } => {
            write!(w, "MULTI[{id}]{{ ")?;
            write_expr(child, w, sql)?;
            write!(w, " }}")
        }
    }
}

fn write_op<W: Write>(op: Operator, operands: &[Expr], w: &mut W, sql: bool) -> fmt::Result {
    match (op, operands) {
        (Operator::Neg, [x]) => {
            write!(w, "-")?;
            write_expr(x, w, sql)
        }
        (Operator::Not, [x]) => {
            write!(w, "not ")?;
            write_expr(x, w, sql)
        }
        (Operator::Between, [x, lower, upper]) => {
            write_expr(x, w, sql)?;
            write!(w, " between ")?;
            write_expr(lower, w, sql)?;
            write!(w, " and ")?;
            write_expr(upper, w, sql)
        }
        (_, [a, b]) => {
            write_expr(a, w, sql)?;
            write!(w, " {} ", op.symbol())?;
            write_expr(b, w, sql)
        }
        // Malformed arity: fall back to a call-like rendering.
        (_, rest) => {
            write!(w, "{}(", op.symbol())?;
            for (i, x) in rest.iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                write_expr(x, w, sql)?;
            }
            write!(w, ")")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::ListExpr;
    use super::*;

    #[test]
    fn operator_forms() {
        let x = Expr::column("x");
        assert_eq!(
            Expr::op(Operator::Add, vec![x.clone(), Expr::IntConst(1)]).to_string(),
            "x + 1"
        );
        assert_eq!(
            Expr::op(
                Operator::Between,
                vec![x.clone(), Expr::IntConst(1), Expr::FloatConst(2.5)]
            )
            .to_string(),
            "x between 1 and 2.5"
        );
        assert_eq!(
            Expr::op(Operator::Not, vec![Expr::BoolConst(true)]).to_string(),
            "not true"
        );
        assert_eq!(Expr::op(Operator::Neg, vec![x]).to_string(), "-x");
    }

    #[test]
    fn function_forms() {
        assert_eq!(
            Expr::func("int", vec![Expr::column("d")]).to_string(),
            "CAST(d AS INTEGER)"
        );
        assert_eq!(Expr::func("count", vec![]).to_string(), "count(*)");
        assert_eq!(
            Expr::func("sum", vec![Expr::column("a")]).to_string(),
            "sum(a)"
        );
    }

    #[test]
    fn choice_forms() {
        let any = Expr::Any {
            id: "c".into(),
            choices: vec![Expr::column("a"), Expr::column("b")],
        };
        assert_eq!(any.to_string(), "ANY[c]{ a, b,  }");
        let val = Expr::Val {
            id: "v".into(),
            domain: Box::new(Expr::func("domain", vec![Expr::column("a")])),
        };
        assert_eq!(val.to_string(), "VAL[v]{ domain(a) }");
    }

    #[test]
    fn sql_quotes_strings() {
        let e = Expr::op(
            Operator::In,
            vec![
                Expr::column("name"),
                Expr::List(ListExpr {
                    begin: "(".into(),
                    end: ")".into(),
                    delim: ", ".into(),
                    elements: vec![
                        Expr::StringConst("o'brien".into()),
                        Expr::StringConst("x".into()),
                    ],
                }),
            ],
        );
        assert_eq!(e.to_sql(), "name in ('o''brien', 'x')");
        assert_eq!(e.to_string(), "name in (o'brien, x)");
    }
}
