//! Built-in tools
//!
//! | Tool | Purpose |
//! |---|---|
//! | `analyzeIntent` | keyword classification of a chat message |
//! | `naturalToSql` | lookup-table translation to a parameterised statement |
//! | `executeQuery` | raw statement against the shared worker |
//! | `switchContext` | change the active context, creating it when a role is given |
//! | `vectorSearch` | rank stored records against a caller-supplied embedding |
//! | `generateImage`, `generateMusic` | run a pipeline and store the result |
//! | `searchGenerations` | semantic search over stored images |
//! | `storeGeneration` | store externally produced content |

pub mod intent;
pub mod media;
pub mod session;
pub mod sql;

use conclave_core::{ConclaveError, ConclaveResult, Generator, Interrupt, ToolName, ToolResult};
use conclave_store::{ContextManager, GenerationRepository, StorageEngine};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::registry::{ToolRegistry, handler_fn};
use crate::shape::ArgumentShape as S;

pub use intent::{Intent, IntentKind, Medium, analyze_intent};
pub use sql::{SqlStatement, execute_query, natural_to_sql};

/// Everything the built-in tools operate on
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<dyn StorageEngine>,
    pub contexts: Arc<ContextManager>,
    pub generations: Arc<GenerationRepository>,
    pub generator: Arc<dyn Generator>,
    /// Fired on shutdown to abort in-flight generations
    pub interrupt: Interrupt,
}

/// Register a tool whose arguments deserialize into `A`
fn register_typed<A, F, Fut>(
    registry: &mut ToolRegistry,
    services: &Services,
    name: &'static str,
    description: &str,
    shape: S,
    handler: F,
) -> ToolResult<()>
where
    A: DeserializeOwned + 'static,
    F: Fn(Services, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConclaveResult<Value>> + Send + 'static,
{
    let services = services.clone();
    registry.register(
        ToolName::new_unchecked(name),
        description,
        shape,
        handler_fn(move |args| {
            let call = serde_json::from_value::<A>(args)
                .map(|args| handler(services.clone(), args));
            async move {
                match call {
                    Ok(running) => running.await,
                    Err(e) => Err(ConclaveError::from(e)),
                }
            }
        }),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeIntentArgs {
    message: String,
    available_tools: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct NaturalToSqlArgs {
    natural: String,
}

#[derive(Deserialize)]
struct ExecuteQueryArgs {
    query: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchContextArgs {
    context_id: String,
    role: Option<String>,
}

/// Tool that acts on a classified intent, if any
fn tool_for(intent: &Intent) -> Option<&'static str> {
    match (intent.intent, intent.medium) {
        (IntentKind::Generate, Some(Medium::Image)) => Some("generateImage"),
        (IntentKind::Generate, Some(Medium::Music)) => Some("generateMusic"),
        (IntentKind::Query, _) => Some("naturalToSql"),
        _ => None,
    }
}

/// Register every built-in tool
pub fn register_builtins(registry: &mut ToolRegistry, services: &Services) -> ToolResult<()> {
    register_typed(
        registry,
        services,
        "analyzeIntent",
        "Classify a chat message as generate, query or chat",
        S::object([
            ("message", S::string()),
            ("context", S::optional(S::string())),
            ("availableTools", S::optional(S::array(S::string()))),
        ]),
        |_, args: AnalyzeIntentArgs| async move {
            let mut intent = analyze_intent(&args.message);
            // An intent the caller has no tool for degrades to chat.
            if let (Some(available), Some(tool)) = (&args.available_tools, tool_for(&intent)) {
                if !available.iter().any(|t| t == tool) {
                    intent = Intent {
                        intent: IntentKind::Chat,
                        medium: None,
                    };
                }
            }
            serde_json::to_value(intent).map_err(ConclaveError::from)
        },
    )?;

    register_typed(
        registry,
        services,
        "naturalToSql",
        "Translate a natural-language request into a parameterised SQL statement",
        S::object([("natural", S::string()), ("context", S::optional(S::string()))]),
        |_, args: NaturalToSqlArgs| async move {
            serde_json::to_value(natural_to_sql(&args.natural)).map_err(ConclaveError::from)
        },
    )?;

    register_typed(
        registry,
        services,
        "executeQuery",
        "Run a SQL statement with bound parameters against the shared database",
        S::object([
            ("query", S::string()),
            ("params", S::optional(S::array(S::any()))),
        ]),
        |services, args: ExecuteQueryArgs| async move {
            execute_query(services.storage.as_ref(), &args.query, &args.params).await
        },
    )?;

    register_typed(
        registry,
        services,
        "switchContext",
        "Make a context active, creating it first when a role is given",
        S::object([
            ("contextId", S::string()),
            ("role", S::optional(S::string())),
        ]),
        |services, args: SwitchContextArgs| async move {
            session::switch(&services.contexts, &args.context_id, args.role).await
        },
    )?;

    register_typed(
        registry,
        services,
        "vectorSearch",
        "Rank stored generations by cosine similarity to an embedding",
        S::object([
            ("embedding", S::array(S::number())),
            ("limit", S::optional(S::integer())),
            ("threshold", S::optional(S::number())),
        ]),
        |services, args: media::VectorSearchArgs| async move {
            media::vector_search(&services, args).await
        },
    )?;

    register_typed(
        registry,
        services,
        "generateImage",
        "Generate an image from a prompt and store it",
        S::object([("prompt", S::string()), ("style", S::optional(S::string()))]),
        |services, args: media::GenerateImageArgs| async move {
            media::generate_image(&services, args).await
        },
    )?;

    register_typed(
        registry,
        services,
        "generateMusic",
        "Generate music from a prompt and store it",
        S::object([("prompt", S::string()), ("bpm", S::optional(S::integer()))]),
        |services, args: media::GenerateMusicArgs| async move {
            media::generate_music(&services, args).await
        },
    )?;

    register_typed(
        registry,
        services,
        "searchGenerations",
        "Semantic search over stored images",
        S::object([
            ("query", S::string()),
            ("limit", S::optional(S::integer())),
            ("threshold", S::optional(S::number())),
            ("segment", S::optional(S::boolean())),
        ]),
        |services, args: media::SearchGenerationsArgs| async move {
            media::search_generations(&services, args).await
        },
    )?;

    register_typed(
        registry,
        services,
        "storeGeneration",
        "Store externally produced content as a generation record",
        S::object([
            ("type", S::string()),
            ("prompt", S::string()),
            ("content", S::string()),
            ("metadata", S::optional(S::any())),
            ("embedding", S::optional(S::array(S::number()))),
        ]),
        |services, args: media::StoreGenerationArgs| async move {
            media::store_generation(&services, args).await
        },
    )?;

    Ok(())
}

/// Registry holding only the built-in tools
pub fn builtin_registry(services: &Services) -> ToolResult<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, services)?;
    Ok(registry)
}
