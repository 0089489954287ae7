//! Prompt compiler. Pure and deterministic: the same sanitized text and
//! engine version always render the same pair of instructions.

use super::sanitizer::SanitizedText;

/// Behavioural rules. Sent on the system channel so nothing the user writes
/// can restate or override them.
pub const SYSTEM_INSTRUCTION: &str = "Você é um motor analítico de linguagem comportamental.
Sua função é analisar textos e retornar exclusivamente um objeto JSON válido.

REGRAS ABSOLUTAS:
1. Não gere aconselhamento psicológico ou emocional.
2. Não gere diagnóstico clínico de nenhum tipo.
3. Não invente dados ausentes no texto.
4. Justifique todas as inferências com referência ao texto.
5. Responda APENAS com JSON válido, sem markdown, sem texto antes ou depois.
6. Não use blocos de código como ```json, apenas o JSON puro.

DEFINIÇÕES:
- FATO: Informação explicitamente declarada no texto.
- INFERÊNCIA: Conclusão razoável baseada no texto, que deve ser justificada.
- HIPÓTESE: Possibilidade especulativa, sem base direta no texto.

MÉTRICAS (escala 0.0 a 10.0):
- risco_emocional: Intensidade de sofrimento emocional perceptível no texto.
- indice_manipulacao: Presença de padrões de manipulação ou coerção comunicativa.
- ambivalencia: Contradição ou inconsistência entre sentimentos/declarações.
- coerencia_interna: Consistência lógica entre as partes do discurso.";

const TEXT_DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPrompt {
    pub system_instruction: String,
    pub user_instruction: String,
}

/// Literal rendering of the document shape the model must return.
pub fn expected_shape(engine_version: &str) -> String {
    format!(
        r#"{{
  "analise": {{
    "fatos": ["string"],
    "inferencias": [{{"afirmacao": "string", "justificativa": "string"}}],
    "hipoteses": ["string"]
  }},
  "metricas": {{
    "risco_emocional": 0.0,
    "indice_manipulacao": 0.0,
    "ambivalencia": 0.0,
    "coerencia_interna": 0.0
  }},
  "justificativa": "Explicação geral do raciocínio analítico.",
  "timestamp": "ISO 8601",
  "engine_version": "{engine_version}"
}}"#
    )
}

pub fn compile(text: &SanitizedText, engine_version: &str) -> CompiledPrompt {
    let user_instruction = format!(
        "Analise o seguinte texto comportamental e retorne EXCLUSIVAMENTE o JSON no formato especificado abaixo.

TEXTO PARA ANÁLISE:
{delim}
{text}
{delim}

FORMATO DE RESPOSTA OBRIGATÓRIO:
{shape}

Lembre-se:
- Preencha o campo \"timestamp\" com a data/hora atual em ISO 8601.
- Preencha o campo \"engine_version\" com \"{engine_version}\".
- Todos os valores numéricos de métricas devem ser floats entre 0.0 e 10.0.
- Não adicione nenhum texto fora do JSON.",
        delim = TEXT_DELIMITER,
        text = text.as_str(),
        shape = expected_shape(engine_version),
        engine_version = engine_version,
    );

    CompiledPrompt {
        system_instruction: SYSTEM_INSTRUCTION.to_string(),
        user_instruction,
    }
}
