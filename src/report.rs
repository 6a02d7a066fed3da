use crate::evaluate::Metrics;

/// Renders metrics as a two-column table framed by a titled panel.
pub fn render_metrics(title: &str, metrics: &Metrics) -> String {
    let rows = metrics
        .iter()
        .map(|(name, value)| (name.to_string(), format!("{value}")))
        .collect::<Vec<_>>();

    let name_width = rows
        .iter()
        .map(|(name, _)| name.chars().count())
        .chain(std::iter::once("Metric".len()))
        .max()
        .unwrap_or(0)
        + 2;
    let value_width = rows
        .iter()
        .map(|(_, value)| value.chars().count())
        .chain(std::iter::once("Value".len()))
        .max()
        .unwrap_or(0)
        + 2;
    let inner_width = (name_width + value_width + 1).max(title.chars().count() + 2);
    // widen the value column when the title is the widest line
    let value_width = inner_width - name_width - 1;

    let rule = |left: char, mid: char, right: char| {
        format!(
            "{left}{}{mid}{}{right}",
            "─".repeat(name_width),
            "─".repeat(value_width)
        )
    };
    let row = |name: &str, value: &str| {
        format!("│{name:^name_width$}│{value:^value_width$}│")
    };

    let mut lines = vec![
        format!("╭{}╮", "─".repeat(inner_width)),
        format!("│{title:^inner_width$}│"),
        rule('├', '┬', '┤'),
        row("Metric", "Value"),
        rule('├', '┼', '┤'),
    ];
    lines.extend(rows.iter().map(|(name, value)| row(name, value)));
    lines.push(rule('╰', '┴', '╯'));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lists_every_metric() {
        let metrics = Metrics::from_iter([("eval_loss", 1.25), ("eval_bleu", 17.5)]);
        let table = render_metrics("Evaluation Metrics", &metrics);

        assert!(table.contains("Evaluation Metrics"));
        assert!(table.contains("eval_loss"));
        assert!(table.contains("1.25"));
        assert!(table.contains("eval_bleu"));
        assert!(table.contains("17.5"));
    }

    #[test]
    fn table_lines_share_one_width() {
        let metrics = Metrics::from_iter([("a", 1.0), ("a_much_longer_metric_name", 123456.789)]);
        let table = render_metrics("Evaluation Metrics", &metrics);

        let widths = table
            .lines()
            .map(|line| line.chars().count())
            .collect::<Vec<_>>();
        assert!(widths.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
