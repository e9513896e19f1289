//! Expected pixel position of a reference source in a given image.

use chrono::{DateTime, Utc};

use photocal_core::Astrometry;

use crate::services::CelestialTransform;

/// Pixel position of `astrometry` at `epoch` in an image with the given WCS.
///
/// Sky coordinates win when both they and a WCS are available; otherwise the
/// stored pixel position is used. Proper motion is applied in whichever frame
/// is used, provided the image epoch, the reference epoch and a non-zero rate
/// are all known.
pub fn source_xy(
    astrometry: &Astrometry,
    epoch: Option<DateTime<Utc>>,
    wcs: Option<&dyn CelestialTransform>,
) -> Option<(f64, f64)> {
    let elapsed = epoch
        .zip(astrometry.pm_epoch)
        .map(|(epoch, pm_epoch)| seconds_between(pm_epoch, epoch));

    if let (Some(ra_hours), Some(dec_degs), Some(wcs)) =
        (astrometry.ra_hours, astrometry.dec_degs, wcs)
    {
        let (mut ra, mut dec) = (ra_hours * 15.0, dec_degs);
        if let Some((mu, theta)) = motion(astrometry.pm_sky, astrometry.pm_pos_angle_sky, elapsed) {
            // Position angle is measured from north through east.
            ra += mu * theta.sin() / dec.to_radians().cos();
            dec += mu * theta.cos();
        }
        if let Some(xy) = wcs.world_to_pixel(ra, dec) {
            return Some(xy);
        }
    }

    let (mut x, mut y) = (astrometry.x?, astrometry.y?);
    if let Some((mu, theta)) = motion(astrometry.pm_pixel, astrometry.pm_pos_angle_pixel, elapsed) {
        x += mu * theta.cos();
        y += mu * theta.sin();
    }
    Some((x, y))
}

/// Total displacement and direction (radians) of a proper motion.
fn motion(rate: Option<f64>, angle_degs: Option<f64>, elapsed: Option<f64>) -> Option<(f64, f64)> {
    let rate = rate.filter(|r| *r != 0.0)?;
    Some((rate * elapsed?, angle_degs.unwrap_or(0.0).to_radians()))
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_seconds() as f64,
    }
}
