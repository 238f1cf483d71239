//! Beamline element model.
//!
//! An [`Element`] is one line of the lattice block: the four leading
//! values every line carries (`L`, `nseg`, `bmpstp`, `itype`) plus a
//! variant-specific parameter list held in [`ElementKind`]. The wire
//! discriminator `itype` is never stored; it is derived from the kind.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PropertyError;

/// Every element type Impact-T knows about, including the ones this crate
/// can decode but not encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Drift,
    Quadrupole,
    Constfoc,
    Solenoid,
    Dipole,
    Multipole,
    DriftTubeLinac,
    SuperconductingCavity,
    Solrf,
    Emfield,
    EmfieldCartesian,
    EmfieldCylindrical,
    EmfieldAnalytical,
    OffsetBeam,
    WriteBeam,
    WriteBeamForRestart,
    ChangeTimestep,
    RotationallySymmetricTo3d,
    Wakefield,
    MergeBins,
    Spacecharge,
    WriteSliceInfo,
    Stop,
    Comment,
}

const ITYPE_TABLE: &[(ElementType, i32)] = &[
    (ElementType::Drift, 0),
    (ElementType::Quadrupole, 1),
    (ElementType::Constfoc, 2),
    (ElementType::Solenoid, 3),
    (ElementType::Dipole, 4),
    (ElementType::Multipole, 5),
    (ElementType::DriftTubeLinac, 101),
    (ElementType::SuperconductingCavity, 104),
    (ElementType::Solrf, 105),
    (ElementType::Emfield, 110),
    (ElementType::EmfieldCartesian, 111),
    (ElementType::EmfieldCylindrical, 112),
    (ElementType::EmfieldAnalytical, 113),
    (ElementType::OffsetBeam, -1),
    (ElementType::WriteBeam, -2),
    (ElementType::WriteBeamForRestart, -3),
    (ElementType::ChangeTimestep, -4),
    (ElementType::RotationallySymmetricTo3d, -5),
    (ElementType::Wakefield, -6),
    (ElementType::MergeBins, -7),
    (ElementType::Spacecharge, -8),
    (ElementType::WriteSliceInfo, -9),
    (ElementType::Stop, -99),
];

impl ElementType {
    /// Wire discriminator. `None` only for comments.
    pub fn itype(self) -> Option<i32> {
        ITYPE_TABLE
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, itype)| *itype)
    }

    pub fn from_itype(itype: i32) -> Option<Self> {
        ITYPE_TABLE
            .iter()
            .find(|(_, i)| *i == itype)
            .map(|(t, _)| *t)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drift => "drift",
            Self::Quadrupole => "quadrupole",
            Self::Constfoc => "constfoc",
            Self::Solenoid => "solenoid",
            Self::Dipole => "dipole",
            Self::Multipole => "multipole",
            Self::DriftTubeLinac => "drift_tube_linac",
            Self::SuperconductingCavity => "superconducting_cavity",
            Self::Solrf => "solrf",
            Self::Emfield => "emfield",
            Self::EmfieldCartesian => "emfield_cartesian",
            Self::EmfieldCylindrical => "emfield_cylindrical",
            Self::EmfieldAnalytical => "emfield_analytical",
            Self::OffsetBeam => "offset_beam",
            Self::WriteBeam => "write_beam",
            Self::WriteBeamForRestart => "write_beam_for_restart",
            Self::ChangeTimestep => "change_timestep",
            Self::RotationallySymmetricTo3d => "rotationally_symmetric_to_3d",
            Self::Wakefield => "wakefield",
            Self::MergeBins => "merge_bins",
            Self::Spacecharge => "spacecharge",
            Self::WriteSliceInfo => "write_slice_info",
            Self::Stop => "stop",
            Self::Comment => "comment",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific parameters, in the order they appear after `itype`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Drift {
        #[serde(default)]
        zedge: f64,
        #[serde(default)]
        radius: f64,
    },
    Quadrupole {
        #[serde(default)]
        zedge: f64,
        #[serde(default)]
        b1_gradient: f64,
        #[serde(default)]
        file_id: f64,
        #[serde(default)]
        radius: f64,
        #[serde(default)]
        x_offset: f64,
        #[serde(default)]
        y_offset: f64,
        #[serde(default)]
        x_rotation: f64,
        #[serde(default)]
        y_rotation: f64,
        #[serde(default)]
        z_rotation: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rf_frequency: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rf_phase_deg: Option<f64>,
    },
    Dipole {
        #[serde(default)]
        zedge: f64,
        #[serde(default)]
        b_field_x: f64,
        #[serde(default)]
        b_field: f64,
        #[serde(default)]
        file_id: f64,
        #[serde(default)]
        half_gap: f64,
    },
    Solrf {
        #[serde(default)]
        zedge: f64,
        #[serde(default)]
        rf_field_scale: f64,
        #[serde(default)]
        rf_frequency: f64,
        #[serde(default)]
        theta0_deg: f64,
        #[serde(default)]
        file_id: f64,
        #[serde(default)]
        radius: f64,
        #[serde(default)]
        x_offset: f64,
        #[serde(default)]
        y_offset: f64,
        #[serde(default)]
        x_rotation: f64,
        #[serde(default)]
        y_rotation: f64,
        #[serde(default)]
        z_rotation: f64,
        #[serde(default)]
        solenoid_field_scale: f64,
    },
    Wakefield {
        #[serde(default)]
        s_begin: f64,
        #[serde(default)]
        s_end: f64,
        #[serde(default)]
        method: f64,
        #[serde(default)]
        iris_radius: f64,
        #[serde(default)]
        gap: f64,
        #[serde(default)]
        period: f64,
    },
    Spacecharge {
        #[serde(default)]
        s: f64,
        #[serde(default)]
        is_on: bool,
    },
    ChangeTimestep {
        #[serde(default)]
        s: f64,
        #[serde(default)]
        dt: f64,
    },
    OffsetBeam {
        #[serde(default)]
        s: f64,
        #[serde(default)]
        x_offset: f64,
        #[serde(default)]
        px_offset: f64,
        #[serde(default)]
        y_offset: f64,
        #[serde(default)]
        py_offset: f64,
        #[serde(default)]
        z_offset: f64,
        #[serde(default)]
        pz_offset: f64,
    },
    WriteBeam {
        #[serde(default)]
        s: f64,
    },
    WriteBeamForRestart {
        #[serde(default)]
        s: f64,
    },
    Stop {
        #[serde(default)]
        s: f64,
    },
    Comment {
        text: String,
    },
    /// Recognized by the decoder but without an encoder; the raw `V1..Vn`
    /// values are kept so nothing is lost.
    Unsupported {
        element_type: ElementType,
        #[serde(default)]
        values: Vec<f64>,
    },
}

impl ElementKind {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Drift { .. } => ElementType::Drift,
            Self::Quadrupole { .. } => ElementType::Quadrupole,
            Self::Dipole { .. } => ElementType::Dipole,
            Self::Solrf { .. } => ElementType::Solrf,
            Self::Wakefield { .. } => ElementType::Wakefield,
            Self::Spacecharge { .. } => ElementType::Spacecharge,
            Self::ChangeTimestep { .. } => ElementType::ChangeTimestep,
            Self::OffsetBeam { .. } => ElementType::OffsetBeam,
            Self::WriteBeam { .. } => ElementType::WriteBeam,
            Self::WriteBeamForRestart { .. } => ElementType::WriteBeamForRestart,
            Self::Stop { .. } => ElementType::Stop,
            Self::Comment { .. } => ElementType::Comment,
            Self::Unsupported { element_type, .. } => *element_type,
        }
    }

    /// Mutable access to a named numeric parameter.
    fn field_mut(&mut self, key: &str) -> Option<&mut f64> {
        match self {
            Self::Drift { zedge, radius } => match key {
                "zedge" => Some(zedge),
                "radius" => Some(radius),
                _ => None,
            },
            Self::Quadrupole {
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
            } => match key {
                "zedge" => Some(zedge),
                "b1_gradient" => Some(b1_gradient),
                "file_id" => Some(file_id),
                "radius" => Some(radius),
                "x_offset" => Some(x_offset),
                "y_offset" => Some(y_offset),
                "x_rotation" => Some(x_rotation),
                "y_rotation" => Some(y_rotation),
                "z_rotation" => Some(z_rotation),
                "rf_frequency" => Some(rf_frequency.get_or_insert(0.0)),
                "rf_phase_deg" => Some(rf_phase_deg.get_or_insert(0.0)),
                _ => None,
            },
            Self::Dipole {
                zedge,
                b_field_x,
                b_field,
                file_id,
                half_gap,
            } => match key {
                "zedge" => Some(zedge),
                "b_field_x" => Some(b_field_x),
                "b_field" => Some(b_field),
                "file_id" => Some(file_id),
                "half_gap" => Some(half_gap),
                _ => None,
            },
            Self::Solrf {
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
            } => match key {
                "zedge" => Some(zedge),
                "rf_field_scale" => Some(rf_field_scale),
                "rf_frequency" => Some(rf_frequency),
                "theta0_deg" => Some(theta0_deg),
                "file_id" => Some(file_id),
                "radius" => Some(radius),
                "x_offset" => Some(x_offset),
                "y_offset" => Some(y_offset),
                "x_rotation" => Some(x_rotation),
                "y_rotation" => Some(y_rotation),
                "z_rotation" => Some(z_rotation),
                "solenoid_field_scale" => Some(solenoid_field_scale),
                _ => None,
            },
            Self::Wakefield {
                s_begin,
                s_end,
                method,
                iris_radius,
                gap,
                period,
            } => match key {
                "s_begin" => Some(s_begin),
                "s_end" | "s" => Some(s_end),
                "method" => Some(method),
                "iris_radius" => Some(iris_radius),
                "gap" => Some(gap),
                "period" => Some(period),
                _ => None,
            },
            Self::Spacecharge { s, .. } => match key {
                "s" => Some(s),
                _ => None,
            },
            Self::ChangeTimestep { s, dt } => match key {
                "s" => Some(s),
                "dt" => Some(dt),
                _ => None,
            },
            Self::OffsetBeam {
                s,
                x_offset,
                px_offset,
                y_offset,
                py_offset,
                z_offset,
                pz_offset,
            } => match key {
                "s" => Some(s),
                "x_offset" => Some(x_offset),
                "px_offset" => Some(px_offset),
                "y_offset" => Some(y_offset),
                "py_offset" => Some(py_offset),
                "z_offset" => Some(z_offset),
                "pz_offset" => Some(pz_offset),
                _ => None,
            },
            Self::WriteBeam { s } | Self::WriteBeamForRestart { s } | Self::Stop { s } => {
                match key {
                    "s" => Some(s),
                    _ => None,
                }
            }
            Self::Comment { .. } | Self::Unsupported { .. } => None,
        }
    }

    /// Field-map file number referenced by this element, if any.
    pub fn file_id(&self) -> Option<i64> {
        let id = match self {
            Self::Quadrupole { file_id, .. }
            | Self::Dipole { file_id, .. }
            | Self::Solrf { file_id, .. } => *file_id,
            _ => return None,
        };
        if id > 0.0 {
            Some(id as i64)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "L", default)]
    pub length: f64,
    #[serde(default)]
    pub nseg: i64,
    #[serde(default)]
    pub bmpstp: i64,
    #[serde(flatten)]
    pub kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>, length: f64, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            length,
            nseg: 0,
            bmpstp: 0,
            kind,
            original: None,
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self::new(
            "",
            0.0,
            ElementKind::Comment { text: text.into() },
        )
    }

    /// Sets the segment and map-step counts. They only reach the encoded
    /// line for variants with a negative `itype`.
    pub fn with_steps(mut self, nseg: i64, bmpstp: i64) -> Self {
        self.nseg = nseg;
        self.bmpstp = bmpstp;
        self
    }

    pub fn element_type(&self) -> ElementType {
        self.kind.element_type()
    }

    pub fn itype(&self) -> Option<i32> {
        self.element_type().itype()
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, ElementKind::Comment { .. })
    }

    /// Sets one numeric attribute by key.
    ///
    /// Accepts `L`/`length`, `nseg`, `bmpstp` and any parameter of the
    /// element's kind. For `spacecharge`, `is_on` takes the sign of `value`.
    pub fn set(&mut self, key: &str, value: f64) -> Result<(), PropertyError> {
        let unknown = |name: &str| PropertyError::UnknownField {
            element: name.to_string(),
            key: key.to_string(),
        };
        match key {
            "L" | "length" => self.length = value,
            "nseg" => self.nseg = value as i64,
            "bmpstp" => self.bmpstp = value as i64,
            "is_on" => {
                if let ElementKind::Spacecharge { is_on, .. } = &mut self.kind {
                    *is_on = value > 0.0;
                } else {
                    return Err(unknown(&self.name));
                }
            }
            _ => match self.kind.field_mut(key) {
                Some(slot) => *slot = value,
                None => return Err(unknown(&self.name)),
            },
        }
        Ok(())
    }
}

/// MAD-style listing, e.g. `D1: drift, L=0.5, radius=0.01, zedge=0.0`.
impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let ElementKind::Comment { text } = &self.kind {
            if text.trim() == "!" {
                return Ok(());
            }
            return f.write_str(text);
        }
        let value = serde_json::to_value(self).map_err(|_| fmt::Error)?;
        let mut line = format!("{}: {}", self.name, self.element_type());
        let mut width = line.len();
        if let Some(obj) = value.as_object() {
            for (key, val) in obj {
                if matches!(key.as_str(), "name" | "type" | "original") {
                    continue;
                }
                let item = format!("{}={}", key, val);
                width += item.len() + 2;
                if width > 80 {
                    line.push_str(",\n      ");
                    width = item.len() + 6;
                } else {
                    line.push_str(", ");
                }
                line.push_str(&item);
            }
        }
        f.write_str(&line)
    }
}
