//! Lane geometry: immutable polylines parameterized by arc length, plus the bubble sensor.
//!
//! Paths come from the circuit drawing as SVG path data. Only straight-line commands are
//! understood (`M L H V Z` and their relative forms), which is all the drawing uses.

use crate::error::CircuitError;
use crate::lane::Lane;
use crate::vecmath::{clamp, Vec2};
use std::collections::BTreeMap;

/// One immutable lane curve with its cached arc length.
#[derive(Debug, Clone, PartialEq)]
pub struct PathGeometry {
    vertices: Vec<Vec2>,
    /// `cumulative[i]` is the arc length from the first vertex to `vertices[i]`.
    cumulative: Vec<f64>,
    total_length: f64,
}

impl PathGeometry {
    /// Builds a polyline path. Fails on fewer than two vertices, non-finite coordinates or
    /// zero total length.
    pub fn from_points(vertices: Vec<Vec2>) -> Result<Self, CircuitError> {
        if vertices.len() < 2 {
            return Err(CircuitError::DegeneratePath(format!(
                "need at least 2 vertices, got {}",
                vertices.len()
            )));
        }
        if let Some(bad) = vertices.iter().position(|v| !v.is_finite()) {
            return Err(CircuitError::DegeneratePath(format!(
                "vertex {} has a non-finite coordinate",
                bad
            )));
        }

        let mut cumulative = Vec::with_capacity(vertices.len());
        let mut total_length = 0.0;
        cumulative.push(0.0);
        for pair in vertices.windows(2) {
            total_length += pair[0].distance(pair[1]);
            cumulative.push(total_length);
        }

        if !(total_length > 0.0) {
            return Err(CircuitError::DegeneratePath("total length is zero".to_string()));
        }

        Ok(Self { vertices, cumulative, total_length })
    }

    /// Parses SVG path data and builds the resulting polyline.
    pub fn from_svg_path(data: &str) -> Result<Self, CircuitError> {
        Self::from_points(parse_svg_path(data)?)
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    /// Point at `fraction * total_length()` along the path. The fraction is clamped to [0, 1].
    pub fn point_at(&self, fraction: f64) -> Vec2 {
        let target = clamp(fraction, 0.0, 1.0) * self.total_length;
        let idx = self.cumulative.partition_point(|&c| c < target);
        if idx == 0 {
            return self.vertices[0];
        }
        if idx >= self.vertices.len() {
            return self.vertices[self.vertices.len() - 1];
        }
        // cumulative[idx - 1] < target <= cumulative[idx], so the segment has positive length.
        let seg_start = self.cumulative[idx - 1];
        let seg_len = self.cumulative[idx] - seg_start;
        self.vertices[idx - 1].lerp(self.vertices[idx], (target - seg_start) / seg_len)
    }
}

/// The fixed bubble sensor: a hit circle in drawing space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensor {
    pub center: Vec2,
    pub radius: f64,
}

impl Sensor {
    pub fn new(center: Vec2, radius: f64) -> Result<Self, CircuitError> {
        if !center.is_finite() {
            return Err(CircuitError::InvalidSensor("sensor position is not finite".to_string()));
        }
        if !radius.is_finite() || radius <= 0.0 {
            return Err(CircuitError::InvalidSensor(format!(
                "sensor radius must be positive, got {}",
                radius
            )));
        }
        Ok(Self { center, radius })
    }

    /// True when `point` lies within the hit radius (boundary inclusive).
    pub fn detects(&self, point: Vec2) -> bool {
        point.distance_squared(self.center) <= self.radius * self.radius
    }
}

/// Everything the engine needs to know about the drawing: one path per lane and the sensor.
#[derive(Debug, Clone)]
pub struct CircuitLayout {
    pub lanes: BTreeMap<Lane, PathGeometry>,
    /// Display names from the configuration, used in logs.
    pub lane_names: BTreeMap<Lane, String>,
    pub sensor: Sensor,
}

impl CircuitLayout {
    pub fn new(sensor: Sensor) -> Self {
        Self { lanes: BTreeMap::new(), lane_names: BTreeMap::new(), sensor }
    }

    /// Adds a lane's geometry, rejecting a second definition of the same lane.
    pub fn insert_lane(&mut self, lane: Lane, name: &str, geometry: PathGeometry) -> Result<(), CircuitError> {
        if self.lanes.contains_key(&lane) {
            return Err(CircuitError::DuplicateLane(lane));
        }
        self.lanes.insert(lane, geometry);
        self.lane_names.insert(lane, name.to_string());
        Ok(())
    }

    pub fn geometry(&self, lane: Lane) -> Option<&PathGeometry> {
        self.lanes.get(&lane)
    }

    /// Decorative lanes, in configuration order.
    pub fn decorative_lanes(&self) -> Vec<Lane> {
        self.lanes.keys().copied().filter(Lane::is_decorative).collect()
    }

    pub fn lane_name(&self, lane: Lane) -> String {
        self.lane_names.get(&lane).cloned().unwrap_or_else(|| lane.to_string())
    }
}

/// Parses polyline SVG path data into absolute vertices.
pub fn parse_svg_path(data: &str) -> Result<Vec<Vec2>, CircuitError> {
    let mut lexer = PathLexer::new(data);
    let mut points: Vec<Vec2> = Vec::new();
    let mut current = Vec2::zero();
    let mut subpath_start = Vec2::zero();
    let mut command: Option<u8> = None;

    loop {
        lexer.skip_separators();
        if lexer.at_end() {
            break;
        }

        if let Some(letter) = lexer.take_command() {
            if matches!(letter, b'Z' | b'z') {
                current = subpath_start;
                points.push(current);
                command = Some(letter);
                continue;
            }
            command = Some(letter);
        }

        let letter = match command {
            Some(letter) => letter,
            None => return Err(lexer.error("path data must start with a command")),
        };

        match letter {
            b'M' | b'm' => {
                if !points.is_empty() {
                    return Err(lexer.error("multiple subpaths are not supported"));
                }
                let (x, y) = (lexer.number()?, lexer.number()?);
                current = if letter == b'm' { current + Vec2::new(x, y) } else { Vec2::new(x, y) };
                subpath_start = current;
                points.push(current);
                // Coordinate pairs following a moveto are implicit linetos.
                command = Some(if letter == b'm' { b'l' } else { b'L' });
            }
            b'L' | b'l' => {
                let (x, y) = (lexer.number()?, lexer.number()?);
                current = if letter == b'l' { current + Vec2::new(x, y) } else { Vec2::new(x, y) };
                points.push(current);
            }
            b'H' | b'h' => {
                let x = lexer.number()?;
                current.x = if letter == b'h' { current.x + x } else { x };
                points.push(current);
            }
            b'V' | b'v' => {
                let y = lexer.number()?;
                current.y = if letter == b'v' { current.y + y } else { y };
                points.push(current);
            }
            b'Z' | b'z' => return Err(lexer.error("closepath takes no coordinates")),
            other => {
                return Err(lexer.error(&format!("unsupported path command '{}'", other as char)))
            }
        }
    }

    Ok(points)
}

struct PathLexer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PathLexer<'a> {
    fn new(data: &'a str) -> Self {
        Self { bytes: data.as_bytes(), pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_separators(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b == b',' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn take_command(&mut self) -> Option<u8> {
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() => {
                self.pos += 1;
                Some(b)
            }
            _ => None,
        }
    }

    fn error(&self, message: &str) -> CircuitError {
        CircuitError::PathSyntax { position: self.pos, message: message.to_string() }
    }

    /// Reads one number: optional sign, digits with at most one decimal point, optional exponent.
    fn number(&mut self) -> Result<f64, CircuitError> {
        self.skip_separators();
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }
        let mut digits = 0;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
            digits += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
                digits += 1;
            }
        }
        if digits == 0 {
            self.pos = start;
            return Err(self.error("expected a number"));
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let exp_start = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            let mut exp_digits = 0;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
                exp_digits += 1;
            }
            if exp_digits == 0 {
                self.pos = exp_start;
            }
        }

        // The scanned range is ASCII, so slicing the original bytes stays on char boundaries.
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        text.parse::<f64>().map_err(|e| CircuitError::PathSyntax {
            position: start,
            message: format!("invalid number '{}': {}", text, e),
        })
    }
}
