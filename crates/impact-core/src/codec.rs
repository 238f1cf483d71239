//! Element line codec.
//!
//! Every non-comment line starts with `L nseg bmpstp itype`, followed by the
//! variant parameters `V1..Vn`, a `/` terminator and a `!name:<name>`
//! suffix. The format has no native name field; the suffix is how names
//! survive a write/read cycle.

use std::collections::BTreeMap;
use std::fmt;

use crate::element::{Element, ElementKind, ElementType};
use crate::error::CodecError;

const NAME_TAG: &str = "!name:";

/// One value of an encoded element line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Int(i64),
    Real(f64),
}

impl Token {
    pub fn value(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Real(v) => v,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            // Debug keeps the decimal point on whole numbers (5.0, not 5).
            Self::Real(v) => write!(f, "{:?}", v),
        }
    }
}

/// Encodes an element into its positional tokens.
///
/// Returns `Ok(None)` for comments. `nseg`/`bmpstp` are taken from the
/// element only when `itype < 0`; otherwise both are written as `0`.
pub fn encode(element: &Element) -> Result<Option<Vec<Token>>, CodecError> {
    let Some(itype) = element.itype() else {
        return Ok(None);
    };
    let params = variant_params(element)?;
    let (nseg, bmpstp) = if itype < 0 {
        (element.nseg, element.bmpstp)
    } else {
        (0, 0)
    };
    let mut tokens = Vec::with_capacity(4 + params.len());
    tokens.push(Token::Real(element.length));
    tokens.push(Token::Int(nseg));
    tokens.push(Token::Int(bmpstp));
    tokens.push(Token::Int(i64::from(itype)));
    tokens.extend(params.into_iter().map(Token::Real));
    Ok(Some(tokens))
}

fn variant_params(element: &Element) -> Result<Vec<f64>, CodecError> {
    let v = match &element.kind {
        ElementKind::Drift { zedge, radius } => vec![*zedge, *radius],
        ElementKind::Quadrupole {
            zedge,
            b1_gradient,
            file_id,
            radius,
            x_offset,
            y_offset,
            x_rotation,
            y_rotation,
            z_rotation,
            rf_frequency,
            rf_phase_deg,
        } => {
            let mut v = vec![
                *zedge,
                *b1_gradient,
                *file_id,
                *radius,
                *x_offset,
                *y_offset,
                *x_rotation,
                *y_rotation,
                *z_rotation,
            ];
            if rf_frequency.is_some() || rf_phase_deg.is_some() {
                v.push(rf_frequency.unwrap_or(0.0));
                v.push(rf_phase_deg.unwrap_or(0.0));
            }
            v
        }
        ElementKind::Dipole {
            zedge,
            b_field_x,
            b_field,
            file_id,
            half_gap,
        } => vec![*zedge, *b_field_x, *b_field, *file_id, *half_gap],
        ElementKind::Solrf {
            zedge,
            rf_field_scale,
            rf_frequency,
            theta0_deg,
            file_id,
            radius,
            x_offset,
            y_offset,
            x_rotation,
            y_rotation,
            z_rotation,
            solenoid_field_scale,
        } => vec![
            *zedge,
            *rf_field_scale,
            *rf_frequency,
            *theta0_deg,
            *file_id,
            *radius,
            *x_offset,
            *y_offset,
            *x_rotation,
            *y_rotation,
            *z_rotation,
            *solenoid_field_scale,
        ],
        ElementKind::Wakefield {
            s_begin,
            s_end,
            method,
            iris_radius,
            gap,
            period,
        } => vec![0.0, 0.0, *s_begin, *s_end, *method, *iris_radius, *gap, *period],
        ElementKind::Spacecharge { s, is_on } => {
            vec![0.0, if *is_on { 1.0 } else { -1.0 }, *s]
        }
        ElementKind::ChangeTimestep { s, dt } => vec![0.0, 0.0, *s, *dt],
        ElementKind::OffsetBeam {
            s,
            x_offset,
            px_offset,
            y_offset,
            py_offset,
            z_offset,
            pz_offset,
        } => vec![
            0.0, *s, *x_offset, *px_offset, *y_offset, *py_offset, *z_offset, *pz_offset,
        ],
        ElementKind::WriteBeam { s }
        | ElementKind::WriteBeamForRestart { s }
        | ElementKind::Stop { s } => vec![0.0, 0.0, *s],
        ElementKind::Comment { .. } => Vec::new(),
        ElementKind::Unsupported { element_type, .. } => {
            return Err(CodecError::UnsupportedType {
                name: element.name.clone(),
                element_type: *element_type,
            })
        }
    };
    Ok(v)
}

/// Renders the full input-file line for an element.
///
/// Comments render as their text verbatim.
pub fn element_line(element: &Element) -> Result<String, CodecError> {
    if let ElementKind::Comment { text } = &element.kind {
        return Ok(text.clone());
    }
    let tokens = encode(element)?.unwrap_or_default();
    let body = tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(format!("{} / {}{}", body, NAME_TAG, element.name))
}

pub fn lattice_lines(lattice: &[Element]) -> Result<Vec<String>, CodecError> {
    lattice.iter().map(element_line).collect()
}

/// Splits the numeric part of a line (everything before `/`) into tokens.
pub(crate) fn numeric_tokens(line: &str) -> Result<Vec<f64>, CodecError> {
    let data = line.split('/').next().unwrap_or("");
    data.split_whitespace()
        .map(|tok| {
            parse_number(tok).ok_or_else(|| CodecError::BadToken {
                token: tok.to_string(),
                line: line.to_string(),
            })
        })
        .collect()
}

/// Parses a Fortran-style number, accepting `D` exponents.
pub fn parse_number(token: &str) -> Option<f64> {
    token.replace(['D', 'd'], "e").parse::<f64>().ok()
}

fn name_suffix(line: &str) -> Option<String> {
    let (_, rest) = line.split_once('/')?;
    let (_, after) = rest.split_once(NAME_TAG)?;
    after
        .split_whitespace()
        .next()
        .map(|s| s.to_string())
}

/// Decodes one lattice line into an element.
///
/// Blank lines and lines starting with `!` decode to comments. Missing
/// trailing parameters read as `0`. The name comes from the `!name:`
/// suffix and is empty when there is none.
pub fn decode_line(line: &str) -> Result<Element, CodecError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('!') {
        return Ok(Element::comment(line.trim_end()));
    }
    let values = numeric_tokens(trimmed)?;
    if values.len() < 4 {
        return Err(CodecError::Truncated {
            line: trimmed.to_string(),
        });
    }
    let itype = values[3] as i32;
    let element_type = ElementType::from_itype(itype).ok_or_else(|| CodecError::UnknownItype {
        itype,
        line: trimmed.to_string(),
    })?;
    let params = &values[4..];
    let p = |i: usize| params.get(i).copied().unwrap_or(0.0);

    let kind = match element_type {
        ElementType::Drift => ElementKind::Drift {
            zedge: p(0),
            radius: p(1),
        },
        ElementType::Quadrupole => {
            let has_rf = params.len() > 9;
            ElementKind::Quadrupole {
                zedge: p(0),
                b1_gradient: p(1),
                file_id: p(2),
                radius: p(3),
                x_offset: p(4),
                y_offset: p(5),
                x_rotation: p(6),
                y_rotation: p(7),
                z_rotation: p(8),
                rf_frequency: has_rf.then(|| p(9)),
                rf_phase_deg: has_rf.then(|| p(10)),
            }
        }
        ElementType::Dipole => ElementKind::Dipole {
            zedge: p(0),
            b_field_x: p(1),
            b_field: p(2),
            file_id: p(3),
            half_gap: p(4),
        },
        ElementType::Solrf => ElementKind::Solrf {
            zedge: p(0),
            rf_field_scale: p(1),
            rf_frequency: p(2),
            theta0_deg: p(3),
            file_id: p(4),
            radius: p(5),
            x_offset: p(6),
            y_offset: p(7),
            x_rotation: p(8),
            y_rotation: p(9),
            z_rotation: p(10),
            solenoid_field_scale: p(11),
        },
        ElementType::Wakefield => ElementKind::Wakefield {
            s_begin: p(2),
            s_end: p(3),
            method: p(4),
            iris_radius: p(5),
            gap: p(6),
            period: p(7),
        },
        ElementType::Spacecharge => ElementKind::Spacecharge {
            s: p(2),
            is_on: p(1) > 0.0,
        },
        ElementType::ChangeTimestep => ElementKind::ChangeTimestep { s: p(2), dt: p(3) },
        ElementType::OffsetBeam => ElementKind::OffsetBeam {
            s: p(1),
            x_offset: p(2),
            px_offset: p(3),
            y_offset: p(4),
            py_offset: p(5),
            z_offset: p(6),
            pz_offset: p(7),
        },
        ElementType::WriteBeam => ElementKind::WriteBeam { s: p(2) },
        ElementType::WriteBeamForRestart => ElementKind::WriteBeamForRestart { s: p(2) },
        ElementType::Stop => ElementKind::Stop { s: p(2) },
        other => ElementKind::Unsupported {
            element_type: other,
            values: params.to_vec(),
        },
    };

    Ok(Element {
        name: name_suffix(trimmed).unwrap_or_default(),
        length: values[0],
        nseg: values[1] as i64,
        bmpstp: values[2] as i64,
        kind,
        original: Some(trimmed.to_string()),
    })
}

/// Decodes a lattice block. Unnamed elements get `<type>_<k>`, counting
/// from 1 per type in lattice order. Blank lines are dropped.
pub fn parse_lattice<'a, I>(lines: I) -> Result<Vec<Element>, CodecError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<ElementType, usize> = BTreeMap::new();
    let mut lattice = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let mut element = decode_line(line)?;
        if !element.is_comment() {
            let n = counts.entry(element.element_type()).or_default();
            *n += 1;
            if element.name.is_empty() {
                element.name = format!("{}_{}", element.element_type(), n);
            }
        }
        lattice.push(element);
    }
    Ok(lattice)
}
