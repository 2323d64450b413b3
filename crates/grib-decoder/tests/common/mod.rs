//! Synthetic ICON-like GRIB2 messages for decoder tests.
//!
//! Messages use simple packing (template 5.0) and either a regular lat-lon
//! grid (template 3.0, scanning south to north like the DWD regular grids) or
//! an unstructured grid (template 3.101, like ICON global). NaN data values
//! are written as bitmap holes.

#![allow(dead_code)]

use chrono::{Datelike, Duration, TimeZone, Timelike, Utc};

/// DWD originating centre.
const CENTRE_DWD: u16 = 78;

/// Code table 4.4 units.
pub const UNIT_MINUTE: u8 = 0;
pub const UNIT_HOUR: u8 = 1;

/// Fixed surface types (code table 4.5).
pub const SURFACE_GROUND: u8 = 1;
pub const SURFACE_MEAN_SEA_LEVEL: u8 = 101;
pub const SURFACE_HEIGHT_ABOVE_GROUND: u8 = 103;
pub const SURFACE_MODEL_LEVEL: u8 = 150;

#[derive(Debug, Clone, Copy)]
enum Grid {
    /// Microdegrees; first point is the south-west corner.
    LatLon {
        ni: u32,
        nj: u32,
        la1: i32,
        lo1: i32,
        di: u32,
        dj: u32,
    },
    Unstructured {
        num_points: u32,
    },
}

impl Grid {
    fn num_points(&self) -> u32 {
        match *self {
            Grid::LatLon { ni, nj, .. } => ni * nj,
            Grid::Unstructured { num_points } => num_points,
        }
    }
}

/// Build one GRIB2 message.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    reference: (u16, u8, u8, u8),
    grid: Grid,
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_value: u32,
    forecast_unit: u8,
    forecast_time: u32,
    /// `(unit, length)` of the statistical processing interval; switches the
    /// product definition to template 4.8.
    time_range: Option<(u8, u32)>,
    data_values: Vec<f32>,
}

impl Grib2Builder {
    /// 2 m temperature on a 4x4, 0.1 degree grid from (50N, 10E), run
    /// 2024-05-02 12 UTC, step 0.
    pub fn icon_d2() -> Self {
        let (ni, nj) = (4, 4);
        Self {
            discipline: 0,
            reference: (2024, 5, 2, 12),
            grid: Grid::LatLon {
                ni,
                nj,
                la1: 50_000_000,
                lo1: 10_000_000,
                di: 100_000,
                dj: 100_000,
            },
            param_category: 0,
            param_number: 0,
            level_type: SURFACE_HEIGHT_ABOVE_GROUND,
            level_value: 2,
            forecast_unit: UNIT_HOUR,
            forecast_time: 0,
            time_range: None,
            data_values: vec![288.15; (ni * nj) as usize],
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.reference = (year, month, day, hour);
        self
    }

    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        if let Grid::LatLon { la1, lo1, di, dj, .. } = self.grid {
            self.grid = Grid::LatLon {
                ni,
                nj,
                la1,
                lo1,
                di,
                dj,
            };
        }
        self.data_values = vec![0.0; (ni * nj) as usize];
        self
    }

    /// Template 3.101: the file carries no coordinates.
    pub fn unstructured(mut self, num_points: u32) -> Self {
        self.grid = Grid::Unstructured { num_points };
        self.data_values = vec![0.0; num_points as usize];
        self
    }

    pub fn with_parameter(mut self, discipline: u8, category: u8, number: u8) -> Self {
        self.discipline = discipline;
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn with_forecast_hour(self, hour: u32) -> Self {
        self.with_forecast_time(UNIT_HOUR, hour)
    }

    pub fn with_forecast_time(mut self, unit: u8, value: u32) -> Self {
        self.forecast_unit = unit;
        self.forecast_time = value;
        self
    }

    /// Accumulation over `length` units starting at the forecast time.
    pub fn accumulated(mut self, unit: u8, length: u32) -> Self {
        self.time_range = Some((unit, length));
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; self.grid.num_points() as usize];
        self
    }

    pub fn with_gradient(mut self, min_val: f32, max_val: f32) -> Self {
        let n = self.grid.num_points() as usize;
        self.data_values = (0..n)
            .map(|i| min_val + (max_val - min_val) * (i as f32 / n as f32))
            .collect();
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    pub fn values(&self) -> &[f32] {
        &self.data_values
    }

    /// Coordinates `latlons()` should report, in message point order.
    pub fn expected_coordinates(&self) -> Vec<(f64, f64)> {
        match self.grid {
            Grid::LatLon {
                ni,
                nj,
                la1,
                lo1,
                di,
                dj,
            } => (0..nj)
                .flat_map(|j| {
                    (0..ni).map(move |i| {
                        (
                            (la1 as f64 + (j * dj) as f64) / 1e6,
                            (lo1 as f64 + (i * di) as f64) / 1e6,
                        )
                    })
                })
                .collect(),
            Grid::Unstructured { .. } => Vec::new(),
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.build_section1(),
            self.build_section3(),
            self.build_section4(),
            self.build_section5(),
            self.build_section6(),
            self.build_section7(),
        ];
        let message_length = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2);
        message.extend_from_slice(&(message_length as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let (year, month, day, hour) = self.reference;
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);
        section.extend_from_slice(&CENTRE_DWD.to_be_bytes());
        section.extend_from_slice(&255u16.to_be_bytes()); // Sub-centre
        section.push(2); // Master table version
        section.push(1); // Local table version
        section.push(1); // Reference time is start of forecast
        section.extend_from_slice(&year.to_be_bytes());
        section.extend_from_slice(&[month, day, hour, 0, 0]);
        section.push(0); // Operational
        section.push(1); // Forecast
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let mut template = Vec::new();
        let template_number: u16 = match self.grid {
            Grid::LatLon {
                ni,
                nj,
                la1,
                lo1,
                di,
                dj,
            } => {
                template.push(6); // Spherical earth, radius 6371229 m
                template.extend_from_slice(&[0; 15]); // Radius and axes, unused for shape 6
                template.extend_from_slice(&ni.to_be_bytes());
                template.extend_from_slice(&nj.to_be_bytes());
                template.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
                template.extend_from_slice(&u32::MAX.to_be_bytes()); // Subdivisions
                template.extend_from_slice(&grib_i32(la1));
                template.extend_from_slice(&grib_i32(lo1));
                template.push(48); // Resolution and component flags
                template.extend_from_slice(&grib_i32(la1 + ((nj - 1) * dj) as i32));
                template.extend_from_slice(&grib_i32(lo1 + ((ni - 1) * di) as i32));
                template.extend_from_slice(&di.to_be_bytes());
                template.extend_from_slice(&dj.to_be_bytes());
                template.push(0b0100_0000); // +i, +j, i consecutive
                0
            }
            Grid::Unstructured { .. } => {
                template.push(6);
                template.extend_from_slice(&[0, 0, 26]); // Number of grid used
                template.push(1); // Number of grid in reference
                template.extend_from_slice(&[0xab; 16]); // Horizontal grid UUID
                101
            }
        };

        let mut section = Vec::new();
        section.extend_from_slice(&(14 + template.len() as u32).to_be_bytes());
        section.push(3);
        section.push(0); // Grid defined by template
        section.extend_from_slice(&self.grid.num_points().to_be_bytes());
        section.push(0);
        section.push(0);
        section.extend_from_slice(&template_number.to_be_bytes());
        section.extend_from_slice(&template);
        section
    }

    fn build_section4(&self) -> Vec<u8> {
        let mut template = Vec::new();
        template.push(self.param_category);
        template.push(self.param_number);
        template.push(2); // Forecast
        template.push(0);
        template.push(0);
        template.extend_from_slice(&0u16.to_be_bytes()); // Hours of cut-off
        template.push(0); // Minutes of cut-off
        template.push(self.forecast_unit);
        template.extend_from_slice(&self.forecast_time.to_be_bytes());
        template.push(self.level_type);
        template.push(0);
        template.extend_from_slice(&self.level_value.to_be_bytes());
        template.push(255); // No second surface
        template.push(0);
        template.extend_from_slice(&0u32.to_be_bytes());

        let template_number: u16 = match self.time_range {
            None => 0,
            Some((unit, length)) => {
                let end = self.interval_end(unit, length);
                template.extend_from_slice(&end.0.to_be_bytes());
                template.extend_from_slice(&[end.1, end.2, end.3, end.4, 0]);
                template.push(1); // One time range specification
                template.extend_from_slice(&0u32.to_be_bytes()); // Missing values in process
                template.push(1); // Accumulation
                template.push(2); // Successive steps, same reference time
                template.push(unit);
                template.extend_from_slice(&length.to_be_bytes());
                template.push(255); // No increment
                template.extend_from_slice(&0u32.to_be_bytes());
                8
            }
        };

        let mut section = Vec::new();
        section.extend_from_slice(&(9 + template.len() as u32).to_be_bytes());
        section.push(4);
        section.extend_from_slice(&0u16.to_be_bytes()); // No coordinate values
        section.extend_from_slice(&template_number.to_be_bytes());
        section.extend_from_slice(&template);
        section
    }

    /// End of the statistical processing interval as (year, month, day, hour, minute).
    fn interval_end(&self, unit: u8, length: u32) -> (u16, u8, u8, u8, u8) {
        let (year, month, day, hour) = self.reference;
        let minutes = |unit: u8, value: u32| match unit {
            UNIT_MINUTE => i64::from(value),
            _ => i64::from(value) * 60,
        };
        let end = Utc
            .with_ymd_and_hms(i32::from(year), month.into(), day.into(), hour.into(), 0, 0)
            .unwrap()
            + Duration::minutes(
                minutes(self.forecast_unit, self.forecast_time) + minutes(unit, length),
            );
        (
            end.year() as u16,
            end.month() as u8,
            end.day() as u8,
            end.hour() as u8,
            end.minute() as u8,
        )
    }

    fn encoded_values(&self) -> Vec<f32> {
        self.data_values.iter().copied().filter(|v| !v.is_nan()).collect()
    }

    fn has_bitmap(&self) -> bool {
        self.data_values.iter().any(|v| v.is_nan())
    }

    fn build_section5(&self) -> Vec<u8> {
        let values = self.encoded_values();
        let (min_val, max_val) = min_max(&values);
        let range = max_val - min_val;
        let bits_per_value: u8 = if range == 0.0 { 0 } else { 16 };
        let binary_scale_factor = binary_scale_factor(range);

        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);
        section.extend_from_slice(&(values.len() as u32).to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0
        section.extend_from_slice(&min_val.to_be_bytes());
        section.extend_from_slice(&grib_i16(binary_scale_factor));
        section.extend_from_slice(&grib_i16(0)); // Decimal scale factor
        section.push(bits_per_value);
        section.push(0); // Floating point
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        if !self.has_bitmap() {
            return vec![0, 0, 0, 6, 6, 255];
        }

        let mut bitmap = vec![0u8; self.data_values.len().div_ceil(8)];
        for (i, value) in self.data_values.iter().enumerate() {
            if !value.is_nan() {
                bitmap[i / 8] |= 0b1000_0000 >> (i % 8);
            }
        }

        let mut section = Vec::new();
        section.extend_from_slice(&(6 + bitmap.len() as u32).to_be_bytes());
        section.push(6);
        section.push(0); // Bitmap follows
        section.extend_from_slice(&bitmap);
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let values = self.encoded_values();
        let (min_val, max_val) = min_max(&values);
        let range = max_val - min_val;

        let mut packed = Vec::new();
        if range != 0.0 {
            let scale = 2.0_f32.powi(binary_scale_factor(range) as i32);
            for &val in &values {
                let packed_value = ((val - min_val) / scale).round() as u16;
                packed.extend_from_slice(&packed_value.to_be_bytes());
            }
        }

        let mut section = Vec::new();
        section.extend_from_slice(&(5 + packed.len() as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }
}

/// Concatenate messages into one multi-message stream, as the DWD fetcher does.
pub fn build_file(messages: &[Grib2Builder]) -> Vec<u8> {
    messages.iter().flat_map(|m| m.build()).collect()
}

fn min_max(values: &[f32]) -> (f32, f32) {
    let (min, max) = values.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| {
        (min.min(v), max.max(v))
    });
    if values.is_empty() {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

/// E such that 16-bit codes span `range`: value = reference + code * 2^E.
fn binary_scale_factor(range: f32) -> i16 {
    if range == 0.0 {
        0
    } else {
        (range / 65535.0).log2().ceil() as i16
    }
}

/// GRIB2 signed integers are sign-magnitude, not two's complement.
fn grib_i16(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs();
    let raw = if value < 0 { magnitude | 0x8000 } else { magnitude };
    raw.to_be_bytes()
}

fn grib_i32(value: i32) -> [u8; 4] {
    let magnitude = value.unsigned_abs();
    let raw = if value < 0 { magnitude | 0x8000_0000 } else { magnitude };
    raw.to_be_bytes()
}
