// projeto: seqforecast
// file: src/pipeline/chart.rs
// Line charts for training curves (plotters, explicit drawing area)

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::FontStyle;
use std::fmt::Display;
use std::ops::Range;

use crate::neural::TrainingError;

pub const GRID_COLOR: RGBColor = RGBColor(229, 229, 229);
const SERIES_COLORS: [RGBColor; 4] = [BLUE, RED, GREEN, MAGENTA];

/// Axis decoration for one chart.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AxisProperties {
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub x_lim: Option<(f64, f64)>,
    pub y_lim: Option<(f64, f64)>,
    /// Values written next to each point, `{:.4}`, raised by `shift`.
    pub label_series: Option<Vec<f64>>,
    pub shift: f64,
}

impl AxisProperties {
    /// Loss-curve decoration, labelling every epoch with its validation loss.
    pub fn loss_by_epoch(val_loss: &[f64]) -> Self {
        AxisProperties {
            title: Some("Loss by Epoch".to_string()),
            x_label: Some("epochs".to_string()),
            y_label: Some("Loss".to_string()),
            x_lim: None,
            y_lim: None,
            label_series: Some(val_loss.to_vec()),
            shift: 5e-4,
        }
    }

    /// Same layout for a metric curve; labels sit just below the points.
    pub fn metric_by_epoch(metric: &str, val_values: &[f64]) -> Self {
        AxisProperties {
            title: Some(format!("{} by Epoch", metric.to_uppercase())),
            y_label: Some(metric.to_uppercase()),
            label_series: Some(val_values.to_vec()),
            shift: -3e-4,
            ..Self::loss_by_epoch(&[])
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotSeries {
    pub label: String,
    pub values: Vec<f64>,
}

impl PlotSeries {
    pub fn new(label: &str, values: Vec<f64>) -> Self {
        PlotSeries {
            label: label.to_string(),
            values,
        }
    }
}

pub(crate) fn chart_err<E: Display>(err: E) -> TrainingError {
    TrainingError::Chart(err.to_string())
}

fn padded(lo: f64, hi: f64) -> Range<f64> {
    if !(lo.is_finite() && hi.is_finite()) {
        return 0.0..1.0;
    }
    let span = hi - lo;
    if span.abs() < f64::EPSILON {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        return (lo - pad)..(hi + pad);
    }
    (lo - span * 0.05)..(hi + span * 0.05)
}

fn axis_ranges(props: &AxisProperties, series: &[PlotSeries]) -> (Range<f64>, Range<f64>) {
    let points = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let x_range = match props.x_lim {
        Some((lo, hi)) => lo..hi,
        None if points <= 1 => -0.5..0.5,
        None => padded(0.0, (points - 1) as f64),
    };

    let y_range = match props.y_lim {
        Some((lo, hi)) => lo..hi,
        None => {
            let labelled = props
                .label_series
                .iter()
                .flatten()
                .map(|v| v + props.shift);
            let (lo, hi) = series
                .iter()
                .flat_map(|s| s.values.iter().copied())
                .chain(labelled)
                .filter(|v| v.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            padded(lo, hi)
        }
    };
    (x_range, y_range)
}

/// Draws `series` as marked lines on `area`, x being the point index.
///
/// Light grid, legend in the lower-left corner, axes on the left and bottom only.
pub fn draw_line_chart<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    props: &AxisProperties,
    series: &[PlotSeries],
) -> Result<(), TrainingError> {
    if series.iter().all(|s| s.values.is_empty()) {
        return Err(TrainingError::Chart("nothing to plot".to_string()));
    }
    let (x_range, y_range) = axis_ranges(props, series);

    let mut builder = ChartBuilder::on(area);
    builder.margin(15).x_label_area_size(40).y_label_area_size(70);
    if let Some(title) = &props.title {
        builder.caption(title, ("sans-serif", 24).into_font().style(FontStyle::Bold));
    }
    let mut chart = builder.build_cartesian_2d(x_range, y_range).map_err(chart_err)?;

    let mut mesh = chart.configure_mesh();
    mesh.light_line_style(GRID_COLOR).bold_line_style(GRID_COLOR);
    if let Some(x_label) = &props.x_label {
        mesh.x_desc(x_label.as_str());
    }
    if let Some(y_label) = &props.y_label {
        mesh.y_desc(y_label.as_str());
    }
    mesh.draw().map_err(chart_err)?;

    for (idx, s) in series.iter().enumerate() {
        let color = SERIES_COLORS[idx % SERIES_COLORS.len()];
        let points: Vec<(f64, f64)> = s
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| (i as f64, *v))
            .collect();

        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
            .map_err(chart_err)?
            .label(s.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        chart
            .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 4, color.filled())))
            .map_err(chart_err)?;
    }

    if let Some(labels) = &props.label_series {
        let font = ("sans-serif", 13).into_font().style(FontStyle::Bold);
        chart
            .draw_series(
                labels
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(i, v)| Text::new(format!("{:.4}", v), (i as f64, v + props.shift), font.clone())),
            )
            .map_err(chart_err)?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(chart_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(props: &AxisProperties, series: &[PlotSeries]) -> Result<String, TrainingError> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (800, 400)).into_drawing_area();
            root.fill(&WHITE).map_err(chart_err)?;
            draw_line_chart(&root, props, series)?;
            root.present().map_err(chart_err)?;
        }
        Ok(svg)
    }

    #[test]
    fn test_loss_chart_contents() {
        let loss = vec![0.9, 0.6, 0.4];
        let val_loss = vec![0.8, 0.55, 0.5];
        let svg = render(
            &AxisProperties::loss_by_epoch(&val_loss),
            &[PlotSeries::new("loss", loss), PlotSeries::new("val_loss", val_loss.clone())],
        )
        .unwrap();
        assert!(svg.contains("Loss by Epoch"));
        assert!(svg.contains("epochs"));
        assert!(svg.contains("val_loss"));
        for v in &val_loss {
            assert!(svg.contains(&format!("{:.4}", v)));
        }
    }

    #[test]
    fn test_explicit_limits_and_no_labels() {
        let props = AxisProperties {
            x_lim: Some((0.0, 10.0)),
            y_lim: Some((-1.0, 1.0)),
            ..AxisProperties::default()
        };
        let svg = render(&props, &[PlotSeries::new("a", vec![0.1, -0.2, f64::NAN, 0.3])]).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_empty_series_rejected() {
        assert!(matches!(
            render(&AxisProperties::default(), &[PlotSeries::new("a", vec![])]),
            Err(TrainingError::Chart(_))
        ));
    }

    #[test]
    fn test_axis_ranges_include_shifted_labels() {
        let props = AxisProperties {
            label_series: Some(vec![1.0]),
            shift: 1.0,
            ..AxisProperties::default()
        };
        let (x, y) = axis_ranges(&props, &[PlotSeries::new("a", vec![0.0, 1.0])]);
        assert!((x.start + 0.05).abs() < 1e-12 && (x.end - 1.05).abs() < 1e-12);
        assert!(y.end >= 2.0);
    }
}
