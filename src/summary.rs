use crate::extraction_schema::ExtractionResult;

/// Formats a BRL amount the way the CRM shows it (`R$ 20.009,50`); `-` when unknown.
pub fn format_brl(value: Option<f64>) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return "-".to_string();
    };

    let cents = (value.abs() * 100.0).round() as u64;
    let (units, fraction) = (cents / 100, cents % 100);

    let digits = units.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}R$ {},{:02}", sign, grouped, fraction)
}

pub fn bool_label(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "Sim",
        Some(false) => "Não",
        None => "?",
    }
}

fn text_or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

fn number_or_dash(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

impl ExtractionResult {
    /// Plain-text rendering of the result for operators and logs.
    pub fn summary(&self) -> String {
        let indicadores = &self.dados_extraidos.indicadores;
        let produtos = &self.dados_extraidos.produtos_caixa;
        let volumes = &self.dados_extraidos.volumes;

        let mut lines = vec![
            format!("Atendimento: {}", self.atendimento.id_cliente),
            format!("Capturado em: {}", self.atendimento.timestamp),
            String::new(),
            "Indicadores".to_string(),
            format!(
                "  Perfil: {}",
                text_or_dash(indicadores.perfil_investidor.as_deref())
            ),
            format!("  Rating: {}", text_or_dash(indicadores.rating.as_deref())),
            format!("  ICX: {}", number_or_dash(indicadores.icx)),
            format!("  Margem Anual: {}", format_brl(indicadores.margem_anual)),
            format!("  Nicho: {}", text_or_dash(indicadores.nicho.as_deref())),
            format!(
                "  Afinidade: {}",
                text_or_dash(indicadores.afinidade.as_deref())
            ),
            String::new(),
            "Produtos".to_string(),
            format!("  Cartão de Crédito: {}", bool_label(produtos.cartao_credito)),
            format!("  Poupança: {}", bool_label(produtos.poupanca)),
            format!("  Cesta: {}", bool_label(produtos.cesta)),
            format!("  Adesão IBC: {}", bool_label(produtos.adesao_ibc)),
        ];
        for (name, value) in &produtos.extra {
            lines.push(format!("  {}: {}", name, bool_label(*value)));
        }

        lines.push(String::new());
        lines.push("Volumes".to_string());
        lines.push(format!("  Habitação: {}", format_brl(volumes.habitacao)));
        lines.push(format!("  Crédito: {}", format_brl(volumes.credito)));
        lines.push(format!(
            "  Investimentos: {}",
            format_brl(volumes.investimentos)
        ));
        for (name, value) in &volumes.extra {
            lines.push(format!("  {}: {}", name, format_brl(*value)));
        }

        lines.join("\n")
    }
}
