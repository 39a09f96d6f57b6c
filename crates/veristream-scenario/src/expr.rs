//! Arithmetic / comparison expression evaluator for action fields.
//!
//! Values are doubles throughout; booleans are 0.0 / non-zero with an
//! equality tolerance of `1e-10`. Identifiers resolve through the lookup
//! the caller provides, typically backed by the scenario variable store.
//!
//! Precedence, loosest to tightest: `||`, `&&`, `==` `!=`, `<` `<=` `>`
//! `>=`, `+` `-`, `*` `/`, `^` (right-associative, unary sign binds
//! tighter than `^`), primaries.

use thiserror::Error;

const BOOLEAN_EQUALITY_THRESHOLD: f64 = 1e-10;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected character `{found}` at offset {pos}")]
    UnexpectedChar { pos: usize, found: char },
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("built-in `{function}` takes exactly {expected} arguments")]
    ArityMismatch {
        function: &'static str,
        expected: usize,
    },
    #[error("trailing input at offset {pos}")]
    TrailingInput { pos: usize },
}

/// Evaluate `expr`, resolving identifiers through `lookup`.
pub fn eval(expr: &str, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, ExprError> {
    // The grammar has no string literals, so whitespace carries nothing.
    let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parser = Parser {
        bytes: compact.as_bytes(),
        pos: 0,
        lookup,
    };
    let value = parser.read_or()?;
    if parser.pos < parser.bytes.len() {
        return Err(ExprError::TrailingInput { pos: parser.pos });
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<f64>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<u8, ExprError> {
        let c = self.peek().ok_or(ExprError::UnexpectedEof)?;
        self.pos += 1;
        Ok(c)
    }

    fn expect(&mut self, wanted: u8) -> Result<(), ExprError> {
        match self.peek() {
            Some(c) if c == wanted => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(ExprError::UnexpectedChar {
                pos: self.pos,
                found: c as char,
            }),
            None => Err(ExprError::UnexpectedEof),
        }
    }

    fn read_or(&mut self) -> Result<f64, ExprError> {
        let mut v0 = self.read_and()?;
        while self.peek() == Some(b'|') {
            self.pos += 1;
            self.expect(b'|')?;
            let v1 = self.read_and()?;
            v0 = f64::from(
                v0.abs() >= BOOLEAN_EQUALITY_THRESHOLD || v1.abs() >= BOOLEAN_EQUALITY_THRESHOLD,
            );
        }
        Ok(v0)
    }

    fn read_and(&mut self) -> Result<f64, ExprError> {
        let mut v0 = self.read_equality()?;
        while self.peek() == Some(b'&') {
            self.pos += 1;
            self.expect(b'&')?;
            let v1 = self.read_equality()?;
            v0 = f64::from(
                v0.abs() >= BOOLEAN_EQUALITY_THRESHOLD && v1.abs() >= BOOLEAN_EQUALITY_THRESHOLD,
            );
        }
        Ok(v0)
    }

    fn read_equality(&mut self) -> Result<f64, ExprError> {
        let v0 = self.read_comparison()?;
        match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                self.expect(b'=')?;
                let v1 = self.read_comparison()?;
                Ok(f64::from((v0 - v1).abs() < BOOLEAN_EQUALITY_THRESHOLD))
            }
            Some(b'!') if self.bytes.get(self.pos + 1) == Some(&b'=') => {
                self.pos += 2;
                let v1 = self.read_comparison()?;
                Ok(f64::from((v0 - v1).abs() > BOOLEAN_EQUALITY_THRESHOLD))
            }
            _ => Ok(v0),
        }
    }

    fn read_comparison(&mut self) -> Result<f64, ExprError> {
        let v0 = self.read_additive()?;
        let Some(op) = self.peek().filter(|c| matches!(c, b'<' | b'>')) else {
            return Ok(v0);
        };
        self.pos += 1;
        let with_equal = self.peek() == Some(b'=');
        if with_equal {
            self.pos += 1;
        }
        let v1 = self.read_additive()?;
        let result = match (op, with_equal) {
            (b'<', false) => v0 < v1,
            (b'<', true) => v0 <= v1,
            (b'>', false) => v0 > v1,
            (b'>', true) => v0 >= v1,
            _ => unreachable!(),
        };
        Ok(f64::from(result))
    }

    fn read_additive(&mut self) -> Result<f64, ExprError> {
        let mut v0 = self.read_term()?;
        while let Some(op) = self.peek().filter(|c| matches!(c, b'+' | b'-')) {
            self.pos += 1;
            let v1 = self.read_term()?;
            if op == b'+' {
                v0 += v1;
            } else {
                v0 -= v1;
            }
        }
        Ok(v0)
    }

    fn read_term(&mut self) -> Result<f64, ExprError> {
        let mut v0 = self.read_power()?;
        while let Some(op) = self.peek().filter(|c| matches!(c, b'*' | b'/')) {
            self.pos += 1;
            let v1 = self.read_power()?;
            if op == b'*' {
                v0 *= v1;
            } else {
                v0 /= v1;
            }
        }
        Ok(v0)
    }

    fn read_power(&mut self) -> Result<f64, ExprError> {
        let v0 = self.read_unary()?;
        if self.peek() != Some(b'^') {
            return Ok(v0);
        }
        self.pos += 1;
        let mut sign = 1.0;
        if self.peek() == Some(b'-') {
            self.pos += 1;
            sign = -1.0;
        }
        let exponent = sign * self.read_power()?;
        Ok(v0.powf(exponent))
    }

    fn read_unary(&mut self) -> Result<f64, ExprError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.read_primary()?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.read_primary()
            }
            _ => self.read_primary(),
        }
    }

    fn read_primary(&mut self) -> Result<f64, ExprError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.read_or()?;
                self.expect(b')')?;
                Ok(value)
            }
            Some(c) if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => self.read_identifier(),
            Some(_) => self.read_number(),
            None => Err(ExprError::UnexpectedEof),
        }
    }

    fn read_identifier(&mut self) -> Result<f64, ExprError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name = std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("identifier bytes are ascii")
            .to_string();

        if self.peek() == Some(b'(') {
            self.pos += 1;
            return match name.as_str() {
                "min" => self.read_two_arg_builtin("min", f64::min),
                "max" => self.read_two_arg_builtin("max", f64::max),
                _ => Err(ExprError::UnknownIdentifier(name)),
            };
        }

        (self.lookup)(&name).ok_or(ExprError::UnknownIdentifier(name))
    }

    fn read_two_arg_builtin(
        &mut self,
        function: &'static str,
        apply: fn(f64, f64) -> f64,
    ) -> Result<f64, ExprError> {
        let a = self.read_or()?;
        if self.expect(b',').is_err() {
            return Err(ExprError::ArityMismatch {
                function,
                expected: 2,
            });
        }
        let b = self.read_or()?;
        if self.expect(b')').is_err() {
            return Err(ExprError::ArityMismatch {
                function,
                expected: 2,
            });
        }
        Ok(apply(a, b))
    }

    fn read_number(&mut self) -> Result<f64, ExprError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == b'.' {
                self.pos += 1;
            } else if matches!(c, b'e' | b'E')
                && self.pos > start
                && self.bytes[start..self.pos].iter().any(u8::is_ascii_digit)
            {
                self.pos += 1;
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        if self.pos == start {
            let found = self.bytes[start] as char;
            return Err(ExprError::UnexpectedChar { pos: start, found });
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(ExprError::UnexpectedChar {
                pos: start,
                found: self.bytes[start] as char,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars(_: &str) -> Option<f64> {
        None
    }

    fn eval_plain(expr: &str) -> f64 {
        eval(expr, &no_vars).expect(expr)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval_plain("1+2*3"), 7.0);
        assert_eq!(eval_plain("(1+2)*3"), 9.0);
        assert_eq!(eval_plain("10/4"), 2.5);
        assert_eq!(eval_plain("2^3^2"), 512.0);
        assert_eq!(eval_plain("2^-1"), 0.5);
        assert_eq!(eval_plain("-3+5"), 2.0);
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval_plain("1<2"), 1.0);
        assert_eq!(eval_plain("2<=2"), 1.0);
        assert_eq!(eval_plain("3>4"), 0.0);
        assert_eq!(eval_plain("1==1"), 1.0);
        assert_eq!(eval_plain("1!=1"), 0.0);
        assert_eq!(eval_plain("1&&0"), 0.0);
        assert_eq!(eval_plain("1||0"), 1.0);
        assert_eq!(eval_plain("1<2&&3>2"), 1.0);
    }

    #[test]
    fn builtins() {
        assert_eq!(eval_plain("min(3,5)"), 3.0);
        assert_eq!(eval_plain("max(3,5)"), 5.0);
        assert_eq!(eval_plain("min(1+1,5)*2"), 4.0);
    }

    #[test]
    fn variables_resolve_through_lookup() {
        let lookup = |name: &str| match name {
            "position" => Some(4.0),
            "base" => Some(2.0),
            _ => None,
        };
        assert_eq!(eval("base*3", &lookup).unwrap(), 6.0);
        assert_eq!(eval("min(position, base)", &lookup).unwrap(), 2.0);
        assert_eq!(
            eval("missing", &lookup),
            Err(ExprError::UnknownIdentifier("missing".into()))
        );
    }

    #[test]
    fn whitespace_is_insignificant() {
        assert_eq!(eval_plain(" 1 + 2 * 3 "), 7.0);
        assert_eq!(eval_plain("min( 1 , 2 )"), 1.0);
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(eval_plain("1e3"), 1000.0);
        assert_eq!(eval_plain("2.5e-1"), 0.25);
    }

    #[test]
    fn error_cases() {
        assert_eq!(eval("1+", &no_vars), Err(ExprError::UnexpectedEof));
        assert!(matches!(
            eval("1@2", &no_vars),
            Err(ExprError::TrailingInput { .. }) | Err(ExprError::UnexpectedChar { .. })
        ));
        assert!(matches!(
            eval("min(1)", &no_vars),
            Err(ExprError::ArityMismatch { .. })
        ));
        assert!(matches!(
            eval("sqrt(4)", &no_vars),
            Err(ExprError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            eval("(1+2", &no_vars),
            Err(ExprError::UnexpectedEof)
        ));
    }

    #[test]
    fn equality_uses_tolerance() {
        assert_eq!(eval_plain("0.1+0.2==0.3"), 1.0);
    }
}
