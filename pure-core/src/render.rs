// Textual rendering of terms
//
// Used for diagnostics (uncaught exceptions, finalizer errors, logging) and
// by the Debug-style helpers the tests rely on. Rendering walks the term with
// an explicit work stack, so arbitrarily long lists print without native
// recursion.
//
// Operators are printed infix with the minimal parentheses their combined
// precedence requires; applications bind tighter than any operator.

use crate::interpreter::Interpreter;
use crate::matrix::Elem;
use crate::symtab::{Fixity, NPREC_MAX};
use crate::term::{SymId, TermData, TermRef};
use num_complex::Complex64;

// Precedence of application and of atoms, above every operator.
const APP_PREC: u16 = NPREC_MAX as u16 + 1;
const ATOM_PREC: u16 = NPREC_MAX as u16 + 2;

enum Piece {
    // Render a term; parenthesize it if it binds weaker than the context.
    Term(TermRef, u16),
    Text(&'static str),
    Owned(String),
}

impl Interpreter {
    pub fn render(&self, x: TermRef) -> String {
        let mut out = String::new();
        let mut todo = vec![Piece::Term(x, 0)];
        while let Some(piece) = todo.pop() {
            match piece {
                Piece::Text(s) => out.push_str(s),
                Piece::Owned(s) => out.push_str(&s),
                Piece::Term(x, ctx) => self.render_step(x, ctx, &mut out, &mut todo),
            }
        }
        out
    }

    // Emits atoms directly; compound terms push their parts in reverse
    // order so they pop out left to right.
    fn render_step(&self, x: TermRef, ctx: u16, out: &mut String, todo: &mut Vec<Piece>) {
        if x.is_null() || !self.heap.is_live(x) {
            out.push_str("#<dead>");
            return;
        }
        let x = self.resolve(x);
        match self.heap.data(x) {
            TermData::Int(n) => push_signed(out, n.to_string(), ctx),
            TermData::BigInt(n) => push_signed(out, format!("{}L", n), ctx),
            TermData::Double(d) => push_signed(out, format_double(*d), ctx),
            TermData::Str(s) => quote_into(out, s),
            TermData::Pointer(p) => out.push_str(&format!("#<pointer {:#x}>", p)),
            TermData::Matrix(_) => self.render_matrix(x, todo),
            TermData::Thunk(_) => out.push_str(&format!("#<thunk {:?}>", x)),
            TermData::Fun(fun) => match fun.sym {
                0 => out.push_str(&format!("#<closure {:?}>", x)),
                sym => self.render_symbol(sym, out),
            },
            TermData::App(..) => self.render_app(x, ctx, todo),
            TermData::Vacant => out.push_str("#<dead>"),
        }
    }

    fn render_symbol(&self, sym: SymId, out: &mut String) {
        let Some(s) = self.symtab.get(sym) else {
            out.push_str(&format!("#<symbol {}>", sym));
            return;
        };
        match s.fixity {
            Fixity::Nullary | Fixity::Outfix => out.push_str(&s.name),
            _ if s.prec < crate::symtab::PREC_MAX => {
                out.push('(');
                out.push_str(&s.name);
                out.push(')');
            }
            _ => out.push_str(&s.name),
        }
    }

    fn render_app(&self, x: TermRef, ctx: u16, todo: &mut Vec<Piece>) {
        if let Some(elems) = self.list_elems(x) {
            // Tuples inside lists keep their parentheses
            let pair = self.symtab.builtins().pair;
            let elem_prec = self.symtab.nprec(pair).map_or(0, |p| u16::from(p) + 1);
            todo.push(Piece::Text("]"));
            push_separated(todo, &elems, ",", elem_prec);
            todo.push(Piece::Text("["));
            return;
        }

        let (head, args) = self.app_spine(x);
        if let Some(op) = self.symbol_of(head).and_then(|s| self.symtab.get(s)) {
            let prec = u16::from(op.nprec());
            let name = op.name.clone();
            let parts: Option<Vec<Piece>> = match (op.fixity, args.as_slice()) {
                (Fixity::Infix | Fixity::InfixL | Fixity::InfixR, &[l, r])
                    if op.prec < crate::symtab::PREC_MAX =>
                {
                    let (lp, rp) = match op.fixity {
                        Fixity::InfixL => (prec, prec + 1),
                        Fixity::InfixR => (prec + 1, prec),
                        _ => (prec + 1, prec + 1),
                    };
                    let sep = if name == "," { name } else { format!(" {} ", name) };
                    Some(vec![Piece::Term(l, lp), Piece::Owned(sep), Piece::Term(r, rp)])
                }
                (Fixity::Prefix, &[a]) => Some(vec![
                    Piece::Owned(format!("{} ", name)),
                    Piece::Term(a, prec),
                ]),
                (Fixity::Postfix, &[a]) => {
                    Some(vec![Piece::Term(a, prec), Piece::Owned(format!(" {}", name))])
                }
                _ => None,
            };
            if let Some(parts) = parts {
                wrap(todo, parts, prec < ctx);
                return;
            }
        }

        let mut parts = Vec::with_capacity(2 * args.len() + 1);
        parts.push(Piece::Term(head, APP_PREC));
        for a in args {
            parts.push(Piece::Text(" "));
            parts.push(Piece::Term(a, ATOM_PREC));
        }
        wrap(todo, parts, APP_PREC < ctx);
    }

    // {x11,x12;x21,x22}
    fn render_matrix(&self, x: TermRef, todo: &mut Vec<Piece>) {
        let Some(m) = self.matrix(x) else {
            return;
        };
        let (rows, cols) = (m.rows(), m.cols());
        let mut parts = Vec::with_capacity(2 * rows * cols + 1);
        parts.push(Piece::Text("{"));
        for i in 0..rows {
            if i > 0 {
                parts.push(Piece::Text(";"));
            }
            for j in 0..cols {
                if j > 0 {
                    parts.push(Piece::Text(","));
                }
                match m.elem(i, j) {
                    Elem::Term(t) => parts.push(Piece::Term(t, 0)),
                    Elem::Int(n) => parts.push(Piece::Owned(n.to_string())),
                    Elem::Real(d) => parts.push(Piece::Owned(format_double(d))),
                    Elem::Complex(z) => parts.push(Piece::Owned(format_complex(z))),
                }
            }
        }
        parts.push(Piece::Text("}"));
        todo.extend(parts.into_iter().rev());
    }
}

fn wrap(todo: &mut Vec<Piece>, parts: Vec<Piece>, parens: bool) {
    if parens {
        todo.push(Piece::Text(")"));
    }
    todo.extend(parts.into_iter().rev());
    if parens {
        todo.push(Piece::Text("("));
    }
}

fn push_separated(todo: &mut Vec<Piece>, xs: &[TermRef], sep: &'static str, prec: u16) {
    for (i, &x) in xs.iter().enumerate().rev() {
        todo.push(Piece::Term(x, prec));
        if i > 0 {
            todo.push(Piece::Text(sep));
        }
    }
}

// Negative numbers in argument position need parentheses: f (-1).
fn push_signed(out: &mut String, text: String, ctx: u16) {
    if text.starts_with('-') && ctx >= APP_PREC {
        out.push('(');
        out.push_str(&text);
        out.push(')');
    } else {
        out.push_str(&text);
    }
}

pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        "nan".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else {
        // Debug keeps a trailing ".0" for integral values
        format!("{:?}", d)
    }
}

pub fn format_complex(z: Complex64) -> String {
    format!("{}+:{}", format_double(z.re), format_double(z.im))
}

fn quote_into(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push_str(&format!("\\{}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
