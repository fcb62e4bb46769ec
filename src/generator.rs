use std::sync::Arc;

use tracing::info;

use crate::{
    bundle::{self, BundleStore},
    error::ServiceError,
    model::{
        AppliedPreset, ChatMessage, ChatPayload, GenerationRequest, GenerationResponse,
        apply_limits, resolve_model,
    },
    normalize::normalize_html,
    upstream::ChatBackend,
};

const SYSTEM_PROMPT: &str = "Du bist ein KI-Webdesigner. Antworte ausschließlich mit einem \
vollständigen, lauffähigen HTML-Dokument. Verwende eingebettetes CSS. \
Keine externen Skripte/Stylesheets/Fonts. Sprache: Deutsch.";

/// Runs one prompt through model resolution, the upstream call and the
/// bundle pipeline.
pub struct Generator {
    backend: Arc<dyn ChatBackend>,
    bundles: BundleStore,
}

impl Generator {
    pub fn new(backend: Arc<dyn ChatBackend>, bundles: BundleStore) -> Self {
        Self { backend, bundles }
    }

    pub fn bundles(&self) -> &BundleStore {
        &self.bundles
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ServiceError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ServiceError::BadRequest("prompt must not be empty".into()));
        }

        let model = resolve_model(request.model.as_deref());
        let applied = apply_limits(model, request.max_tokens, request.temperature);

        let bundle_id = self.bundles.ensure(request.bundle_id.as_deref()).await?;
        let assets = self
            .select_assets(&bundle_id, request.image_names.as_deref())
            .await?;

        let payload = build_payload(prompt, &assets, &applied);
        info!(
            bundle_id = %bundle_id,
            model = %applied.model,
            max_tokens = applied.max_tokens,
            assets = assets.len(),
            "generating page"
        );

        let data = self.backend.complete(&payload).await?;
        let content = extract_content(&data);
        let meta = match data.get("usage") {
            Some(serde_json::Value::Object(usage)) => usage.clone(),
            _ => serde_json::Map::new(),
        };

        let html = normalize_html(content);
        let storage = bundle::rewrite_for_storage(&html, &assets);
        let preview = bundle::rewrite_for_preview(&storage, &bundle_id);
        self.bundles.persist(&bundle_id, &storage).await?;

        info!(bundle_id = %bundle_id, bytes = storage.len(), "page generated");

        Ok(GenerationResponse {
            bundle_id,
            html: storage,
            html_preview: preview,
            meta,
            assets,
            applied,
        })
    }

    /// Explicitly requested images that exist on disk, or every stored asset
    /// when no explicit list was given.
    async fn select_assets(
        &self,
        bundle_id: &str,
        requested: Option<&[String]>,
    ) -> Result<Vec<String>, ServiceError> {
        let on_disk = self.bundles.list_assets(bundle_id).await?;
        let Some(requested) = requested else {
            return Ok(on_disk);
        };
        let wanted: Vec<String> = requested
            .iter()
            .filter_map(|name| bundle::sanitize_filename(name))
            .collect();
        Ok(on_disk
            .into_iter()
            .filter(|name| wanted.contains(name))
            .collect())
    }
}

pub fn build_payload(prompt: &str, assets: &[String], applied: &AppliedPreset) -> ChatPayload {
    let mut user = format!(
        "Erstelle eine One-Page-Website basierend auf:\n\n{prompt}\n\n\
         - responsiv, gut lesbar\n- dezentes Design\n- keine externen Abhängigkeiten\n\
         - gib NUR das vollständige HTML-Dokument zurück"
    );

    if !assets.is_empty() {
        user.push_str(
            "\n\nBinde die folgenden hochgeladenen Bilder sichtbar in die Seite ein \
             (z. B. Hero, Galerie, Logo). Verwende exakt diese Dateinamen als \
             relative Pfade in src- bzw. url()-Angaben:\n",
        );
        for name in assets {
            user.push_str("- ");
            user.push_str(name);
            user.push('\n');
        }
    }

    ChatPayload {
        model: applied.model.clone(),
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
        temperature: applied.temperature,
        max_tokens: applied.max_tokens,
        stream: false,
    }
}

fn extract_content(data: &serde_json::Value) -> &str {
    data.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
}
