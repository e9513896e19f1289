//! Gnomonic (TAN) world coordinate system read from FITS header keywords.
//!
//! Distortion terms (SIP, TPV) are ignored; a `RA---TAN-SIP` header is read
//! as plain TAN.

use std::sync::Arc;

use anyhow::{Context as _, bail};

use photocal_core::FitsHeader;

use crate::services::{CelestialTransform, WcsFactory};

/// Linear TAN projection: pixel offsets from `crpix` map through `cd`
/// (degrees per pixel) onto the tangent plane at `crval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TanWcs {
    /// Reference sky position (RA, Dec) in degrees.
    crval: (f64, f64),
    /// Reference pixel, 1-based.
    crpix: (f64, f64),
    cd: [[f64; 2]; 2],
    cd_inv: [[f64; 2]; 2],
}

impl TanWcs {
    pub fn new(crval: (f64, f64), crpix: (f64, f64), cd: [[f64; 2]; 2]) -> anyhow::Result<Self> {
        let cd_inv = invert(&cd).context("singular CD matrix")?;
        Ok(Self {
            crval,
            crpix,
            cd,
            cd_inv,
        })
    }

    /// `Ok(None)` when the header describes no celestial TAN projection.
    pub fn from_header(header: &FitsHeader) -> anyhow::Result<Option<Self>> {
        let (Some(ctype1), Some(ctype2)) = (header.get_str("CTYPE1"), header.get_str("CTYPE2"))
        else {
            return Ok(None);
        };
        let (ctype1, ctype2) = (ctype1.trim().to_ascii_uppercase(), ctype2.trim().to_ascii_uppercase());
        if !(ctype1.starts_with("RA---TAN") && ctype2.starts_with("DEC--TAN")) {
            return Ok(None);
        }

        let required = |key: &str| {
            header
                .get_f64(key)
                .with_context(|| format!("missing WCS keyword {key}"))
        };
        let crval = (required("CRVAL1")?, required("CRVAL2")?);
        let crpix = (required("CRPIX1")?, required("CRPIX2")?);
        Self::new(crval, crpix, linear_transform(header)?).map(Some)
    }

    pub fn cd(&self) -> [[f64; 2]; 2] {
        self.cd
    }
}

fn linear_transform(header: &FitsHeader) -> anyhow::Result<[[f64; 2]; 2]> {
    const CD: [[&str; 2]; 2] = [["CD1_1", "CD1_2"], ["CD2_1", "CD2_2"]];
    const PC: [[&str; 2]; 2] = [["PC1_1", "PC1_2"], ["PC2_1", "PC2_2"]];

    if CD.iter().flatten().any(|key| header.contains(key)) {
        return Ok(CD.map(|row| row.map(|key| header.get_f64(key).unwrap_or(0.0))));
    }

    let (Some(cdelt1), Some(cdelt2)) = (header.get_f64("CDELT1"), header.get_f64("CDELT2")) else {
        bail!("WCS has neither CD nor CDELT keywords");
    };
    if PC.iter().flatten().any(|key| header.contains(key)) {
        let pc = PC.map(|row| row.map(|key| header.get_f64(key)));
        let unit = |i: usize, j: usize| pc[i][j].unwrap_or(if i == j { 1.0 } else { 0.0 });
        return Ok([
            [cdelt1 * unit(0, 0), cdelt1 * unit(0, 1)],
            [cdelt2 * unit(1, 0), cdelt2 * unit(1, 1)],
        ]);
    }

    let rot = header.get_f64("CROTA2").unwrap_or(0.0).to_radians();
    let (sin, cos) = rot.sin_cos();
    Ok([
        [cdelt1 * cos, -cdelt2 * sin],
        [cdelt1 * sin, cdelt2 * cos],
    ])
}

impl CelestialTransform for TanWcs {
    fn pixel_to_world(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (dx, dy) = (x - self.crpix.0, y - self.crpix.1);
        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();
        let (ra, dec) = deproject(xi, eta, self.crval.0.to_radians(), self.crval.1.to_radians());
        let (ra, dec) = (ra.to_degrees().rem_euclid(360.0), dec.to_degrees());
        (ra.is_finite() && dec.is_finite()).then_some((ra, dec))
    }

    fn world_to_pixel(&self, ra_degs: f64, dec_degs: f64) -> Option<(f64, f64)> {
        let (xi, eta) = project(
            ra_degs.to_radians(),
            dec_degs.to_radians(),
            self.crval.0.to_radians(),
            self.crval.1.to_radians(),
        )?;
        let (xi, eta) = (xi.to_degrees(), eta.to_degrees());
        let dx = self.cd_inv[0][0] * xi + self.cd_inv[0][1] * eta;
        let dy = self.cd_inv[1][0] * xi + self.cd_inv[1][1] * eta;
        Some((dx + self.crpix.0, dy + self.crpix.1))
    }
}

/// Sky → tangent plane, all in radians. `None` for points on the far hemisphere.
fn project(ra: f64, dec: f64, ra0: f64, dec0: f64) -> Option<(f64, f64)> {
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let (sin_da, cos_da) = (ra - ra0).sin_cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
    if denom <= 1e-12 {
        return None;
    }
    Some((
        cos_dec * sin_da / denom,
        (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom,
    ))
}

/// Tangent plane → sky, all in radians.
fn deproject(xi: f64, eta: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let rho = xi.hypot(eta);
    if rho < 1e-15 {
        return (ra0, dec0);
    }
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let (sin_c, cos_c) = rho.atan().sin_cos();

    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
    let ra = ra0 + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}

fn invert(m: &[[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < 1e-30 || !det.is_finite() {
        return None;
    }
    Some([
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ])
}

/// Builds a [`TanWcs`] from the image header.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderWcsFactory;

impl WcsFactory for HeaderWcsFactory {
    fn build_wcs(&self, header: &FitsHeader) -> anyhow::Result<Option<Arc<dyn CelestialTransform>>> {
        Ok(TanWcs::from_header(header)?.map(|wcs| Arc::new(wcs) as Arc<dyn CelestialTransform>))
    }
}
