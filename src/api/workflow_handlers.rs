use axum::http::Method;
use axum::response::Html;

use crate::api::context::{CallArgs, RequestContext};
use crate::api::dispatch::{Blueprint, RouteOptions};
use crate::api::error::{RouteError, ServerError};
use crate::api::params::{ParamType, Signature};
use crate::api::render::escape_html;
use crate::logic::multi_step::{FormErrors, MultiStepForm};
use crate::logic::reindex::{
    self, BarcodeInput, CompleteReindex, IndexKitMapping, SelectLibraries, BARCODE_TABLE,
    KIT_MAPPING_PREFIX, LIBRARY_TABLE, WORKFLOW,
};
use crate::model::{EntityId, FlashCategory, Library, StepArgs, Table};

pub const REINDEX_PREFIX: &str = "/api/workflows/reindex";

type HtmlResult = Result<Html<String>, ServerError>;

/// Routes of the reindex wizard
pub fn reindex_blueprint() -> Result<Blueprint, RouteError> {
    let mut bp = Blueprint::new(REINDEX_PREFIX);
    let with_context = |name: &str| {
        Signature::new(name)
            .current_user()
            .optional("seq_request_id", ParamType::Int)
    };
    let post = || RouteOptions::htmx().methods([Method::POST]).args(["seq_request_id"]);

    bp.add(
        with_context("begin"),
        RouteOptions::htmx().args(["seq_request_id"]),
        begin,
    )?;
    bp.add(
        with_context("select").optional("uuid", ParamType::Str),
        RouteOptions::htmx()
            .methods([Method::POST])
            .args(["seq_request_id", "uuid"]),
        select,
    )?;
    bp.add(
        with_context("upload_barcode_form")
            .param("uuid", ParamType::Str)
            .param_default(BarcodeInput::FIELD, ParamType::Str, ""),
        post().form([BarcodeInput::FIELD]),
        upload_barcode_form,
    )?;
    bp.add(
        with_context("map_index_kits").param("uuid", ParamType::Str),
        post(),
        map_index_kits,
    )?;
    bp.add(
        with_context("complete_reindex").param("uuid", ParamType::Str),
        post(),
        complete_reindex,
    )?;
    bp.add(
        with_context("previous").param("uuid", ParamType::Str),
        RouteOptions::htmx().args(["seq_request_id"]),
        previous,
    )?;
    Ok(bp)
}

fn step_args(seq_request_id: Option<i64>) -> StepArgs {
    let mut args = StepArgs::new();
    if let Some(id) = seq_request_id {
        args.insert("seq_request_id".to_string(), id.into());
    }
    args
}

fn url(action: &str, uuid: Option<&str>, seq_request_id: Option<i64>) -> String {
    let mut url = format!("{}/{}", REINDEX_PREFIX, action);
    if let Some(uuid) = uuid {
        url.push('/');
        url.push_str(uuid);
    }
    if let Some(id) = seq_request_id {
        url.push_str(&format!("?seq_request_id={}", id));
    }
    url
}

async fn begin(ctx: RequestContext, args: CallArgs) -> HtmlResult {
    ctx.require_insider()?;
    let seq_request_id = args.opt_int("seq_request_id")?;
    let libraries = ctx.db()?.list_libraries(seq_request_id).await?;
    Ok(Html(render_select(&libraries, &FormErrors::new(), seq_request_id, None, &[])))
}

async fn select(ctx: RequestContext, args: CallArgs) -> HtmlResult {
    ctx.require_insider()?;
    let seq_request_id = args.opt_int("seq_request_id")?;
    // set when the user went back to this step of an existing session
    let uuid = args.opt_str("uuid")?.map(str::to_string);
    let uow = ctx.db()?;

    let raw = ctx.request().form_values("library_ids");
    let (table, errors) = SelectLibraries.library_table(uow.as_ref(), &raw).await?;
    if !errors.is_empty() {
        let libraries = uow.list_libraries(seq_request_id).await?;
        return Ok(Html(render_select(&libraries, &errors, seq_request_id, uuid.as_deref(), &[])));
    }

    let mut form = MultiStepForm::open(
        ctx.workflows().clone(),
        WORKFLOW,
        uuid.as_ref(),
        SelectLibraries::STEP,
        step_args(seq_request_id),
        ctx.settings().session_ttl,
    )
    .await?;
    form.add_table(LIBRARY_TABLE, table);
    form.update_data().await?;
    ctx.log().debug(format!("{}: selected {} libraries", form.uuid(), form.require_table(LIBRARY_TABLE)?.len()));

    next_step(&form, seq_request_id)
}

async fn open_step(ctx: &RequestContext, args: &CallArgs, step_name: &str) -> Result<MultiStepForm, ServerError> {
    let uuid = args.str("uuid")?.to_string();
    let seq_request_id = args.opt_int("seq_request_id")?;
    let form = MultiStepForm::open(
        ctx.workflows().clone(),
        WORKFLOW,
        Some(&uuid),
        step_name,
        step_args(seq_request_id),
        ctx.settings().session_ttl,
    )
    .await?;
    Ok(form)
}

async fn upload_barcode_form(ctx: RequestContext, args: CallArgs) -> HtmlResult {
    ctx.require_insider()?;
    let seq_request_id = args.opt_int("seq_request_id")?;
    let mut form = open_step(&ctx, &args, BarcodeInput::STEP).await?;

    let input = args.str(BarcodeInput::FIELD)?;
    let errors = BarcodeInput.process(&mut form, input)?;
    if !errors.is_empty() {
        return Ok(Html(render_barcode_input(&form, &errors, seq_request_id, input)));
    }
    form.update_data().await?;
    next_step(&form, seq_request_id)
}

async fn map_index_kits(ctx: RequestContext, args: CallArgs) -> HtmlResult {
    ctx.require_insider()?;
    let seq_request_id = args.opt_int("seq_request_id")?;
    let mut form = open_step(&ctx, &args, IndexKitMapping::STEP).await?;

    let errors = IndexKitMapping.process(&mut form, &ctx.request().form)?;
    if !errors.is_empty() {
        return Ok(Html(render_kit_mapping(&form, &errors, seq_request_id)));
    }
    form.update_data().await?;
    next_step(&form, seq_request_id)
}

async fn complete_reindex(ctx: RequestContext, args: CallArgs) -> HtmlResult {
    ctx.require_insider()?;
    let form = open_step(&ctx, &args, CompleteReindex::STEP).await?;
    let uuid = form.uuid().clone();

    let updated = CompleteReindex.process(&form, ctx.db()?.as_ref()).await?;
    // a failed commit leaves the session open for another attempt
    ctx.after_commit(move || form.complete());
    ctx.log().info(format!("{}: re-indexed {} libraries", uuid, updated));
    ctx.flash(format!("Re-indexed {} libraries.", updated), FlashCategory::Success);

    Ok(Html(format!(
        "<div id=\"reindex-workflow\" data-uuid=\"{}\">\n<p class=\"success\">Re-indexing complete.</p>\n</div>",
        escape_html(&uuid)
    )))
}

async fn previous(ctx: RequestContext, args: CallArgs) -> HtmlResult {
    ctx.require_insider()?;
    let uuid = args.str("uuid")?.to_string();
    let seq_request_id = args.opt_int("seq_request_id")?;

    let Some((step_name, record)) =
        MultiStepForm::pop_last_step(ctx.workflows().as_ref(), WORKFLOW, &uuid).await?
    else {
        ctx.log().error(format!("{}: failed to pop last step", uuid));
        return Err(ServerError::not_found());
    };

    let registry = reindex::workflow();
    let step = registry.get(&step_name).ok_or_else(|| {
        ServerError::InternalServerError(format!("'{}' is not a step of {}", step_name, WORKFLOW))
    })?;

    if step_name == SelectLibraries::STEP {
        let prefill = step.fill_previous_form(&record);
        let libraries = ctx.db()?.list_libraries(seq_request_id).await?;
        return Ok(Html(render_select(
            &libraries,
            &FormErrors::new(),
            seq_request_id,
            Some(uuid.as_str()),
            &SelectLibraries::prefilled_ids(&prefill),
        )));
    }

    let form = MultiStepForm::open(
        ctx.workflows().clone(),
        WORKFLOW,
        Some(&uuid),
        &step_name,
        step.fill_previous_form(&record),
        ctx.settings().session_ttl,
    )
    .await?;
    render_step(&form, &step_name, seq_request_id)
}

/// Render the step that follows the one `form` just recorded
fn next_step(form: &MultiStepForm, seq_request_id: Option<i64>) -> HtmlResult {
    let registry = reindex::workflow();
    let next = registry.next_after(form.step_name(), form).ok_or_else(|| {
        ServerError::InternalServerError(format!("no step follows '{}'", form.step_name()))
    })?;
    render_step(form, next.step_name(), seq_request_id)
}

fn render_step(form: &MultiStepForm, step_name: &str, seq_request_id: Option<i64>) -> HtmlResult {
    let errors = FormErrors::new();
    let body = match step_name {
        BarcodeInput::STEP => render_barcode_input(form, &errors, seq_request_id, ""),
        IndexKitMapping::STEP => render_kit_mapping(form, &errors, seq_request_id),
        CompleteReindex::STEP => render_complete(form, &errors, seq_request_id)?,
        other => {
            return Err(ServerError::InternalServerError(format!(
                "step '{}' cannot be rendered",
                other
            )))
        }
    };
    Ok(Html(body))
}

fn render_errors(errors: &FormErrors) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let items = errors
        .iter()
        .map(|(_, message)| format!("<li>{}</li>", escape_html(message)))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<ul class=\"form-errors\">\n{}\n</ul>\n", items)
}

fn render_table(table: &Table) -> String {
    let head = table
        .columns
        .iter()
        .map(|c| format!("<th>{}</th>", escape_html(&c.name)))
        .collect::<String>();
    let rows = table
        .rows
        .iter()
        .map(|row| {
            let cells = row
                .iter()
                .map(|cell| format!("<td>{}</td>", escape_html(&cell.to_string())))
                .collect::<String>();
            format!("<tr>{}</tr>", cells)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("<table class=\"table\">\n<thead><tr>{}</tr></thead>\n<tbody>\n{}\n</tbody>\n</table>", head, rows)
}

fn wizard(uuid: Option<&str>, step: &str, back: Option<String>, body: String) -> String {
    let back = back
        .map(|url| format!("\n<button type=\"button\" hx-get=\"{}\" hx-target=\"#reindex-workflow\" hx-swap=\"outerHTML\">Back</button>", url))
        .unwrap_or_default();
    format!(
        "<div id=\"reindex-workflow\" data-uuid=\"{}\" data-step=\"{}\">\n{}{}\n</div>",
        escape_html(uuid.unwrap_or_default()),
        step,
        body,
        back
    )
}

fn render_select(
    libraries: &[Library],
    errors: &FormErrors,
    seq_request_id: Option<i64>,
    uuid: Option<&str>,
    checked: &[EntityId],
) -> String {
    let options = libraries
        .iter()
        .map(|library| {
            format!(
                "<label><input type=\"checkbox\" name=\"library_ids\" value=\"{}\"{}> {}</label>",
                library.id,
                if checked.contains(&library.id) { " checked" } else { "" },
                escape_html(&library.name)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let session = uuid
        .map(|uuid| format!("<input type=\"hidden\" name=\"uuid\" value=\"{}\">\n", escape_html(uuid)))
        .unwrap_or_default();
    wizard(
        uuid,
        SelectLibraries::STEP,
        None,
        format!(
            "<form hx-post=\"{}\" hx-target=\"#reindex-workflow\" hx-swap=\"outerHTML\">\n{}{}{}\n<button type=\"submit\">Continue</button>\n</form>",
            url("select", None, seq_request_id),
            render_errors(errors),
            session,
            options
        ),
    )
}

fn render_barcode_input(form: &MultiStepForm, errors: &FormErrors, seq_request_id: Option<i64>, prefill: &str) -> String {
    let libraries = form.table(LIBRARY_TABLE).map(render_table).unwrap_or_default();
    wizard(
        Some(form.uuid().as_str()),
        BarcodeInput::STEP,
        Some(url("previous", Some(form.uuid().as_str()), seq_request_id)),
        format!(
            "{}\n<form hx-post=\"{}\" hx-target=\"#reindex-workflow\" hx-swap=\"outerHTML\">\n{}<textarea name=\"{}\" placeholder=\"library_id,sequence_i7,sequence_i5,index_kit,index_well\">{}</textarea>\n<button type=\"submit\">Continue</button>\n</form>",
            libraries,
            url("upload_barcode_form", Some(form.uuid().as_str()), seq_request_id),
            render_errors(errors),
            BarcodeInput::FIELD,
            escape_html(prefill)
        ),
    )
}

fn render_kit_mapping(form: &MultiStepForm, errors: &FormErrors, seq_request_id: Option<i64>) -> String {
    let fields = IndexKitMapping::kit_labels(form)
        .iter()
        .map(|label| {
            format!(
                "<label>{label}<input type=\"text\" name=\"{prefix}{label}\"></label>",
                label = escape_html(label),
                prefix = KIT_MAPPING_PREFIX
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    wizard(
        Some(form.uuid().as_str()),
        IndexKitMapping::STEP,
        Some(url("previous", Some(form.uuid().as_str()), seq_request_id)),
        format!(
            "<form hx-post=\"{}\" hx-target=\"#reindex-workflow\" hx-swap=\"outerHTML\">\n{}{}\n<button type=\"submit\">Continue</button>\n</form>",
            url("map_index_kits", Some(form.uuid().as_str()), seq_request_id),
            render_errors(errors),
            fields
        ),
    )
}

fn render_complete(form: &MultiStepForm, errors: &FormErrors, seq_request_id: Option<i64>) -> Result<String, ServerError> {
    let barcodes = form.require_table(BARCODE_TABLE)?;
    Ok(wizard(
        Some(form.uuid().as_str()),
        CompleteReindex::STEP,
        Some(url("previous", Some(form.uuid().as_str()), seq_request_id)),
        format!(
            "{}\n<form hx-post=\"{}\" hx-target=\"#reindex-workflow\" hx-swap=\"outerHTML\">\n{}<button type=\"submit\">Re-index</button>\n</form>",
            render_table(barcodes),
            url("complete_reindex", Some(form.uuid().as_str()), seq_request_id),
            render_errors(errors)
        ),
    ))
}
