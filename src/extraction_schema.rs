//! Extraction result types and the response schema sent to the remote model.
//!
//! Each group is declared once through `extraction_group!`, which emits the
//! Rust struct and the matching schema fragment from the same field list, so
//! the parsed type and the declared schema cannot drift apart.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Scalar types allowed in the response schema (OpenAPI subset).
pub trait SchemaScalar {
    const SCHEMA_TYPE: &'static str;
}

impl SchemaScalar for String {
    const SCHEMA_TYPE: &'static str = "STRING";
}

impl SchemaScalar for f64 {
    const SCHEMA_TYPE: &'static str = "NUMBER";
}

impl SchemaScalar for bool {
    const SCHEMA_TYPE: &'static str = "BOOLEAN";
}

macro_rules! extraction_group {
    (@schema $($field:ident : $ty:ty),*) => {{
        let mut properties = Map::new();
        $(
            properties.insert(
                stringify!($field).to_string(),
                json!({ "type": <$ty as SchemaScalar>::SCHEMA_TYPE, "nullable": true }),
            );
        )*
        json!({ "type": "OBJECT", "properties": properties })
    }};

    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: Option<$ty>, )*
        }

        impl $name {
            pub const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];

            pub fn response_schema() -> Value {
                extraction_group!(@schema $($field : $ty),*)
            }
        }
    };

    (
        $(#[$meta:meta])*
        $name:ident extra $extra:ty { $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: Option<$ty>, )*
            /// Values the model found on screen beyond the declared fields.
            #[serde(flatten)]
            pub extra: BTreeMap<String, Option<$extra>>,
        }

        impl $name {
            pub const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];

            pub fn response_schema() -> Value {
                extraction_group!(@schema $($field : $ty),*)
            }
        }
    };
}

extraction_group! {
    /// Relationship indicators shown on the CRM screen.
    Indicadores {
        perfil_investidor: String,
        rating: String,
        margem_anual: f64,
        icx: f64,
        nicho: String,
        afinidade: String,
    }
}

extraction_group! {
    /// Products the client holds (checkmark on screen = `true`).
    ProdutosCaixa extra bool {
        cartao_credito: bool,
        poupanca: bool,
        cesta: bool,
        adesao_ibc: bool,
    }
}

extraction_group! {
    /// Monetary volumes in BRL, as plain decimals.
    Volumes extra f64 {
        habitacao: f64,
        credito: f64,
        investimentos: f64,
    }
}

/// Which client was served and when the screen was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atendimento {
    pub id_cliente: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DadosExtraidos {
    pub indicadores: Indicadores,
    pub produtos_caixa: ProdutosCaixa,
    pub volumes: Volumes,
}

/// Structured output of analysing one captured screen for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub atendimento: Atendimento,
    pub dados_extraidos: DadosExtraidos,
}

/// Full schema the model's JSON output must conform to.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "atendimento": {
                "type": "OBJECT",
                "properties": {
                    "id_cliente": { "type": "STRING" },
                    "timestamp": { "type": "STRING" },
                },
                "required": ["id_cliente", "timestamp"],
            },
            "dados_extraidos": {
                "type": "OBJECT",
                "properties": {
                    "indicadores": Indicadores::response_schema(),
                    "produtos_caixa": ProdutosCaixa::response_schema(),
                    "volumes": Volumes::response_schema(),
                },
                "required": ["indicadores", "produtos_caixa", "volumes"],
            },
        },
        "required": ["atendimento", "dados_extraidos"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_keys(schema: &Value) -> Vec<String> {
        let mut keys: Vec<String> = schema["properties"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn serialized_keys<T: Serialize>(value: &T) -> Vec<String> {
        let mut keys: Vec<String> = serde_json::to_value(value)
            .unwrap()
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_schema_matches_serialized_types() {
        assert_eq!(
            schema_keys(&Indicadores::response_schema()),
            serialized_keys(&Indicadores::default())
        );
        assert_eq!(
            schema_keys(&ProdutosCaixa::response_schema()),
            serialized_keys(&ProdutosCaixa::default())
        );
        assert_eq!(
            schema_keys(&Volumes::response_schema()),
            serialized_keys(&Volumes::default())
        );

        let schema = response_schema();
        assert_eq!(
            schema_keys(&schema["properties"]["dados_extraidos"]),
            serialized_keys(&DadosExtraidos::default())
        );
    }

    #[test]
    fn test_schema_types_and_nullability() {
        let schema = Indicadores::response_schema();
        assert_eq!(schema["properties"]["rating"]["type"], "STRING");
        assert_eq!(schema["properties"]["margem_anual"]["type"], "NUMBER");
        assert_eq!(schema["properties"]["icx"]["nullable"], true);

        let schema = ProdutosCaixa::response_schema();
        assert_eq!(schema["properties"]["adesao_ibc"]["type"], "BOOLEAN");
    }

    #[test]
    fn test_declared_fields_serialize_as_null() {
        let json = serde_json::to_value(Volumes::default()).unwrap();
        assert_eq!(
            json,
            json!({ "habitacao": null, "credito": null, "investimentos": null })
        );
    }

    #[test]
    fn test_missing_optional_fields_parse_as_null_and_extras_are_kept() {
        let payload = json!({
            "atendimento": { "id_cliente": "C1", "timestamp": "2025-01-01T10:00:00Z" },
            "dados_extraidos": {
                "indicadores": { "rating": "A", "icx": 8 },
                "produtos_caixa": { "cartao_credito": true, "seguro_vida": false },
                "volumes": { "habitacao": 20009.5, "consorcio": null }
            }
        });

        let result: ExtractionResult = serde_json::from_value(payload).unwrap();
        let dados = &result.dados_extraidos;
        assert_eq!(dados.indicadores.rating.as_deref(), Some("A"));
        assert_eq!(dados.indicadores.icx, Some(8.0));
        assert_eq!(dados.indicadores.nicho, None);
        assert_eq!(dados.produtos_caixa.cartao_credito, Some(true));
        assert_eq!(dados.produtos_caixa.poupanca, None);
        assert_eq!(dados.produtos_caixa.extra.get("seguro_vida"), Some(&Some(false)));
        assert_eq!(dados.volumes.habitacao, Some(20009.5));
        assert_eq!(dados.volumes.extra.get("consorcio"), Some(&None));

        let round = serde_json::to_value(&result).unwrap();
        assert_eq!(round["dados_extraidos"]["indicadores"]["nicho"], Value::Null);
        assert_eq!(round["dados_extraidos"]["produtos_caixa"]["seguro_vida"], false);
    }

    #[test]
    fn test_missing_group_is_rejected() {
        let payload = json!({
            "atendimento": { "id_cliente": "C1", "timestamp": "t" },
            "dados_extraidos": { "indicadores": {}, "produtos_caixa": {} }
        });
        assert!(serde_json::from_value::<ExtractionResult>(payload).is_err());
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let payload = json!({
            "atendimento": { "id_cliente": "C1", "timestamp": "t" },
            "dados_extraidos": {
                "indicadores": {},
                "produtos_caixa": { "cesta": "Sim" },
                "volumes": {}
            }
        });
        assert!(serde_json::from_value::<ExtractionResult>(payload).is_err());
    }
}
