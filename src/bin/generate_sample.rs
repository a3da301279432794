use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Smooth field edge: ~1 inside, ~0 outside, 50 % at `half_width`.
fn penumbra(x: f64, half_width: f64, sharpness: f64) -> f64 {
    1.0 / (1.0 + ((x.abs() - half_width) / sharpness).exp())
}

/// Build-up then exponential fall-off, peak near `d_max` (mm).
fn depth_dose(depth_mm: f64, d_max: f64, mu: f64) -> f64 {
    let build_up = 1.0 - (-3.0 * depth_mm / d_max).exp();
    build_up * (-mu * (depth_mm - d_max).max(0.0)).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

// ---------------------------------------------------------------------------
// MCC writer
// ---------------------------------------------------------------------------

struct Beam {
    energy: &'static str,
    detector: &'static str,
    ssd_mm: f64,
    field_mm: f64,
}

struct Scan {
    curve_type: &'static str,
    depth_mm: Option<f64>,
    rows: Vec<(f64, f64)>,
}

fn header(beam: &Beam) -> String {
    format!(
        "\t\tMODALITY=X\n\
         \t\tENERGY={}\n\
         \t\tDETECTOR_TYPE={}\n\
         \t\tSSD={:.2}\n\
         \t\tFIELD_INPLANE={:.2}\n\
         \t\tFIELD_CROSSPLANE={:.2}\n\
         \t\tFIELD_DEFINED=ISOCENTER\n\
         \t\tISOCENTER=1000.00\n\
         \t\tGANTRY=0.00\n\
         \t\tMEAS_PRESET=MEAS_CONTINUOUS\n\
         \t\tSCAN_SPEED_PDD=5.00\n\
         \t\tSCAN_SPEED_PROFILE=10.00\n",
        beam.energy, beam.detector, beam.ssd_mm, beam.field_mm, beam.field_mm
    )
}

fn write_mcc(beam: &Beam, scans: &[Scan]) -> String {
    let mut out = String::from("BEGIN_SCAN_DATA\n\tFORMAT=MEASURED\n");
    for (i, scan) in scans.iter().enumerate() {
        let n = i + 1;
        let _ = writeln!(out, "\tBEGIN_SCAN  {n}");
        out.push_str(&header(beam));
        let _ = writeln!(out, "\t\tSCAN_CURVETYPE={}", scan.curve_type);
        if let Some(depth) = scan.depth_mm {
            let _ = writeln!(out, "\t\tSCAN_DEPTH={depth:.2}");
        }
        out.push_str("\t\tBEGIN_DATA\n");
        for (position, dose) in &scan.rows {
            let _ = writeln!(out, "\t\t\t{position:.2}\t{dose:.4E}");
        }
        out.push_str("\t\tEND_DATA\n");
        let _ = writeln!(out, "\tEND_SCAN  {n}");
    }
    out.push_str("END_SCAN_DATA\n");
    out
}

fn pdd_scan(rng: &mut SimpleRng, d_max: f64, mu: f64) -> Scan {
    let rows = (0..=150)
        .map(|i| {
            let depth = i as f64 * 2.0;
            (depth, depth_dose(depth, d_max, mu) + rng.gauss(0.0, 0.002))
        })
        .collect();
    Scan {
        curve_type: "PDD",
        depth_mm: None,
        rows,
    }
}

fn profile_scan(rng: &mut SimpleRng, beam: &Beam, plane: &'static str, depth_mm: f64) -> Scan {
    // Geometric divergence from the isocentre to the measurement depth.
    let half_width = beam.field_mm / 2.0 * (beam.ssd_mm + depth_mm) / 1000.0;
    let rows = (-80..=80)
        .map(|i| {
            let x = i as f64 * 1.5;
            (x, penumbra(x, half_width, 2.5) + rng.gauss(0.0, 0.003))
        })
        .collect();
    Scan {
        curve_type: plane,
        depth_mm: Some(depth_mm),
        rows,
    }
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let open_6x = Beam {
        energy: "6.00",
        detector: "T31010;Semiflex 0.125",
        ssd_mm: 900.0,
        field_mm: 100.0,
    };
    let fff_10x = Beam {
        energy: "10.00 FFF",
        detector: "T60019;microDiamond",
        ssd_mm: 1000.0,
        field_mm: 40.0,
    };

    let mut files: Vec<(&str, String)> = Vec::new();
    files.push(("pdd_6x_10x10.mcc", write_mcc(&open_6x, &[pdd_scan(&mut rng, 15.0, 0.0045)])));
    files.push(("pdd_10fff_4x4.mcc", write_mcc(&fff_10x, &[pdd_scan(&mut rng, 22.0, 0.0040)])));

    let depths = [15.0, 50.0, 100.0, 200.0];
    let profiles: Vec<Scan> = depths
        .iter()
        .map(|&d| profile_scan(&mut rng, &open_6x, "INPLANE_PROFILE", d))
        .collect();
    files.push(("profiles_6x_10x10.mcc", write_mcc(&open_6x, &profiles)));

    let mut both_planes = Vec::new();
    for &d in &[50.0, 100.0] {
        both_planes.push(profile_scan(&mut rng, &fff_10x, "INPLANE_PROFILE", d));
        both_planes.push(profile_scan(&mut rng, &fff_10x, "CROSSPLANE_PROFILE", d));
    }
    files.push(("profiles_10fff_4x4.mcc", write_mcc(&fff_10x, &both_planes)));

    for (name, text) in &files {
        let path = out_dir.join(name);
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    }

    println!("Wrote {} MCC files to {}", files.len(), out_dir.display());
    Ok(())
}
