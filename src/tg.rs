use crate::catalog::{self, FileEntry, Movie, Quality};
use crate::config::Config;
use crate::gate::GateError;
use crate::monetize::{self, LinkMeta};
use crate::payload::{encode_legacy, Callback, StartPayload};
use crate::storage::Storage;
use crate::tmdb::TmdbClient;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    prelude::*,
    types::{
        CallbackQuery, ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
        MaybeInaccessibleMessage, MessageId, ParseMode, UserId,
    },
    utils::command::BotCommands,
};
use tracing::{info, warn};
use unicode_segmentation::UnicodeSegmentation;

/// Start payloads that look like controller/setup probes; ignored for
/// everyone but the admin.
const BLOCKED_PAYLOAD_WORDS: [&str; 7] =
    ["connect", "controller", "setup", "config", "admin", "panel", "settings"];

/* ====== Commands ====== */
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Commands:")]
enum Command {
    #[command(description = "start / open a download link")]
    Start(String),
    #[command(description = "how to use the bot")]
    Help,
    // admin-only below
    #[command(description = "add a movie quality (reply to a file)")]
    Add(String),
    #[command(description = "add a movie part (reply to a file)")]
    AddPart(String),
    #[command(description = "delete a movie or one quality")]
    Delete(String),
    #[command(description = "list all movies")]
    List,
    #[command(description = "bot statistics")]
    Stats,
    #[command(description = "copy the replied message to all users")]
    Broadcast,
    #[command(description = "debug the channel membership check")]
    CheckSub,
}

/// Everything the handlers need, cloned into each dptree endpoint.
pub struct Ctx {
    pub cfg: Config,
    pub storage: Storage,
    pub tmdb: TmdbClient,
    pub bot_username: String,
}

pub async fn run(bot: Bot, ctx: Ctx) {
    let ctx = Arc::new(ctx);

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint({
                    let ctx = ctx.clone();
                    move |bot: Bot, msg: Message, cmd: Command| {
                        let ctx = ctx.clone();
                        async move { on_command(bot, msg, cmd, &ctx).await }
                    }
                }))
                .branch({
                    let ctx = ctx.clone();
                    dptree::endpoint(move |bot: Bot, msg: Message| {
                        let ctx = ctx.clone();
                        async move { on_search_text(bot, msg, &ctx).await }
                    })
                }),
        )
        .branch(Update::filter_callback_query().endpoint({
            let ctx = ctx.clone();
            move |bot: Bot, q: CallbackQuery| {
                let ctx = ctx.clone();
                async move { on_callback(bot, q, &ctx).await }
            }
        }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/* ====== Commands ====== */

async fn on_command(bot: Bot, msg: Message, cmd: Command, ctx: &Ctx) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else { return Ok(()) };
    let user_id = user.id.0;
    let is_admin = user_id == ctx.cfg.admin_id;

    match cmd {
        Command::Start(payload) => {
            ctx.storage
                .add_user(user_id, user.username.as_deref())
                .await
                .map_err(to_req_err)?;
            on_start(&bot, &msg, &payload, user_id, ctx).await?;
        }
        Command::Help => {
            let mut text = "🎬 <b>Movie Bot</b>\n\nJust send me a movie name!\n\n\
                            <b>Examples:</b>\n• Kill Bill\n• Dune 2021\n• Avengers Endgame"
                .to_string();
            if is_admin {
                text.push_str(
                    "\n\n👑 <b>Admin:</b>\n\
                     /add Movie Name | quality (reply to file)\n\
                     /addpart Movie | part | quality (reply to file)\n\
                     /delete Movie Name [| part] [| quality]\n\
                     /list — all movies\n/stats — statistics\n/broadcast — send to all",
                );
            }
            bot.send_message(msg.chat.id, text).parse_mode(ParseMode::Html).await?;
        }
        Command::Add(args) if is_admin => on_add(&bot, &msg, &args, ctx).await?,
        Command::AddPart(args) if is_admin => on_addpart(&bot, &msg, &args, ctx).await?,
        Command::Delete(args) if is_admin => on_delete(&bot, &msg, &args, ctx).await?,
        Command::List if is_admin => on_list(&bot, &msg, ctx).await?,
        Command::Stats if is_admin => on_stats(&bot, &msg, ctx).await?,
        Command::Broadcast if is_admin => on_broadcast(&bot, &msg, ctx).await?,
        Command::CheckSub if is_admin => {
            let subscribed = check_subscription(&bot, ctx.cfg.channel_id, user_id).await;
            bot.send_message(
                msg.chat.id,
                format!(
                    "🔍 <b>Debug</b>\n\nChannel: <code>{}</code>\nYour status: {}",
                    ctx.cfg.channel_id,
                    if subscribed { "✅ subscribed" } else { "❌ not subscribed" }
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        // admin commands from anyone else are ignored
        _ => {}
    }
    Ok(())
}

/* ====== /start: welcome, deep links, token redemption ====== */

async fn on_start(
    bot: &Bot,
    msg: &Message,
    payload: &str,
    user_id: u64,
    ctx: &Ctx,
) -> ResponseResult<()> {
    let payload = payload.trim();
    info!(user_id, payload, "start");

    if payload.is_empty() {
        return send_welcome(bot, msg.chat.id, ctx).await;
    }

    let lowered = payload.to_lowercase();
    if user_id != ctx.cfg.admin_id && BLOCKED_PAYLOAD_WORDS.iter().any(|w| lowered.contains(w)) {
        return send_welcome(bot, msg.chat.id, ctx).await;
    }

    match StartPayload::parse(payload) {
        None => send_welcome(bot, msg.chat.id, ctx).await,
        Some(StartPayload::Token(token)) => {
            redeem_and_deliver(bot, msg.chat.id, user_id, &token, ctx).await
        }
        Some(StartPayload::Legacy { code, token, .. }) => {
            // membership first; the payload survives for a retry button
            if !check_subscription(bot, ctx.cfg.channel_id, user_id).await {
                return send_subscribe_prompt(bot, msg.chat.id, payload, ctx).await;
            }
            if let Some(token) = token {
                return redeem_and_deliver(bot, msg.chat.id, user_id, &token, ctx).await;
            }
            let Some(movie) = ctx.storage.get_movie(&code).await else {
                return send_welcome(bot, msg.chat.id, ctx).await;
            };
            if movie.parts() > 1 {
                return send_parts_menu(bot, msg.chat.id, None, &movie).await;
            }
            let qualities = movie.qualities_for_part(1);
            match qualities.len() {
                0 => {
                    bot.send_message(msg.chat.id, "❌ No files available for this movie.").await?;
                    Ok(())
                }
                1 => {
                    let quality = *qualities.keys().next().unwrap_or(&Quality::Q720);
                    send_download_link(bot, msg.chat.id, None, user_id, &movie, 1, quality, ctx)
                        .await
                }
                _ => send_quality_menu(bot, msg.chat.id, None, &movie, 1).await,
            }
        }
    }
}

async fn send_welcome(bot: &Bot, chat: ChatId, ctx: &Ctx) -> ResponseResult<()> {
    let kb = InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
        "📢 Join Channel".to_string(),
        ctx.cfg.channel_link.parse().map_err(to_req_err)?,
    )]]);
    bot.send_message(
        chat,
        "🎬 <b>Welcome to Movie Bot!</b>\n\nSend me any movie name to search.\n\n\
         <b>Examples:</b>\n• Kill Bill\n• Dune 2021\n• Avengers Endgame",
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(kb)
    .await?;
    Ok(())
}

async fn send_subscribe_prompt(
    bot: &Bot,
    chat: ChatId,
    payload: &str,
    ctx: &Ctx,
) -> ResponseResult<()> {
    let retry = format!("https://t.me/{}?start={}", ctx.bot_username, payload);
    let kb = InlineKeyboardMarkup::new([
        vec![InlineKeyboardButton::url(
            "📢 Join Channel".to_string(),
            ctx.cfg.channel_link.parse().map_err(to_req_err)?,
        )],
        vec![InlineKeyboardButton::url(
            "✅ Done — Try Again".to_string(),
            retry.parse().map_err(to_req_err)?,
        )],
    ]);
    bot.send_message(
        chat,
        "🔒 <b>Please join our channel</b>\n\nYou must join the channel to use this bot.",
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(kb)
    .await?;
    Ok(())
}

/* ====== Free-text search ====== */

async fn on_search_text(bot: Bot, msg: Message, ctx: &Ctx) -> ResponseResult<()> {
    let Some(text) = msg.text() else { return Ok(()) };
    let text = text.trim();
    if text.is_empty() || text.starts_with('/') {
        return Ok(());
    }
    let Some(user) = msg.from.clone() else { return Ok(()) };
    ctx.storage
        .add_user(user.id.0, user.username.as_deref())
        .await
        .map_err(to_req_err)?;

    if catalog::normalize(text).len() < 2 {
        bot.send_message(msg.chat.id, "❌ Enter at least 2 characters!").await?;
        return Ok(());
    }

    let movies = ctx.storage.search_movies(text).await;

    if movies.is_empty() {
        // not in the catalog: at least tell the user what TMDB knows
        let text = match ctx.tmdb.movie_info(text).await {
            Ok(Some(info)) => format!(
                "❌ <b>Not in database</b>\n\nFound on TMDB:\n🎬 {} ({})\n⭐ {}/10\n\n\
                 Contact admin to add!",
                html_escape(&info.title),
                info.year.as_deref().unwrap_or(""),
                info.rating.map(|r| format!("{r:.1}")).unwrap_or_else(|| "N/A".into()),
            ),
            Ok(None) => "❌ Movie not found! Check spelling.".to_string(),
            Err(e) => {
                warn!(error = %e, "tmdb lookup failed");
                "❌ Movie not found! Check spelling.".to_string()
            }
        };
        bot.send_message(msg.chat.id, text).parse_mode(ParseMode::Html).await?;
        return Ok(());
    }

    if movies.len() == 1 {
        return send_movie_card(&bot, msg.chat.id, &movies[0], ctx).await;
    }

    let rows: Vec<Vec<InlineKeyboardButton>> = movies
        .iter()
        .take(10)
        .map(|m| {
            let parts_text =
                if m.parts() > 1 { format!(" ({} parts)", m.parts()) } else { String::new() };
            vec![InlineKeyboardButton::callback(
                format!("🎬 {}{}", m.title, parts_text),
                Callback::Movie { code: m.code.clone() }.encode(),
            )]
        })
        .collect();
    bot.send_message(msg.chat.id, format!("🔍 Found {} results:", movies.len()))
        .reply_markup(InlineKeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

/// Info card for a single hit: TMDB enrichment when available, plus a
/// deep-link download button.
async fn send_movie_card(bot: &Bot, chat: ChatId, movie: &Movie, ctx: &Ctx) -> ResponseResult<()> {
    let info = ctx.tmdb.movie_info(&movie.title).await.unwrap_or_else(|e| {
        warn!(error = %e, "tmdb lookup failed");
        None
    });

    let parts_text =
        if movie.parts() > 1 { format!("\n📦 Parts: {}", movie.parts()) } else { String::new() };
    let summary = movie.quality_summary(1);
    let quality_text =
        if summary.is_empty() { String::new() } else { format!("\n🎞️ Available: {summary}") };

    let caption = match &info {
        Some(i) => format!(
            "🎬 <b>{}</b> ({})\n⭐ {}/10{}{}\n\n{}",
            html_escape(&i.title),
            i.year.as_deref().unwrap_or(""),
            i.rating.map(|r| format!("{r:.1}")).unwrap_or_else(|| "N/A".into()),
            parts_text,
            quality_text,
            clip(&html_escape(&i.overview), 200),
        ),
        None => format!("🎬 <b>{}</b>{}{}", html_escape(&movie.title), parts_text, quality_text),
    };

    let link = format!(
        "https://t.me/{}?start={}",
        ctx.bot_username,
        encode_legacy(&movie.code, 1, None, None)
    );
    let kb = InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
        "📥 Download".to_string(),
        link.parse().map_err(to_req_err)?,
    )]]);

    if let Some(poster) = info.as_ref().and_then(|i| i.poster_url.as_deref()) {
        if let Ok(bytes) = fetch_image(poster).await {
            bot.send_photo(chat, InputFile::memory(bytes).file_name("poster.jpg"))
                .caption(clip(&caption, 1024))
                .parse_mode(ParseMode::Html)
                .reply_markup(kb.clone())
                .await?;
            return Ok(());
        }
    }
    bot.send_message(chat, caption).parse_mode(ParseMode::Html).reply_markup(kb).await?;
    Ok(())
}

/* ====== Callback buttons ====== */

async fn on_callback(bot: Bot, q: CallbackQuery, ctx: &Ctx) -> ResponseResult<()> {
    let Some(data) = q.data.clone() else { return Ok(()) };
    let (chat_id, message_id) = match q.message.as_ref() {
        Some(MaybeInaccessibleMessage::Regular(m)) => (m.chat.id, Some(m.id)),
        Some(m) => (m.chat().id, None),
        None => return Ok(()),
    };
    let user_id = q.from.id.0;

    let Some(callback) = Callback::parse(&data) else {
        return answer_cb(&bot, &q, "❌ Not found!", true).await;
    };

    match callback {
        Callback::Movie { code } => {
            let Some(movie) = ctx.storage.get_movie(&code).await else {
                return answer_cb(&bot, &q, "❌ Not found!", true).await;
            };
            if movie.parts() > 1 {
                send_parts_menu(&bot, chat_id, message_id, &movie).await?;
            } else {
                send_quality_menu(&bot, chat_id, message_id, &movie, 1).await?;
            }
            answer_cb(&bot, &q, "", false).await?;
        }
        Callback::Part { code, part } | Callback::BackToQualities { code, part } => {
            let Some(movie) = ctx.storage.get_movie(&code).await else {
                return answer_cb(&bot, &q, "❌ Not found!", true).await;
            };
            send_quality_menu(&bot, chat_id, message_id, &movie, part).await?;
            answer_cb(&bot, &q, "", false).await?;
        }
        Callback::Quality { code, part, quality } => {
            // membership gate before any token is issued
            if !check_subscription(&bot, ctx.cfg.channel_id, user_id).await {
                return answer_cb(&bot, &q, "❌ Join channel first!", true).await;
            }
            let Some(movie) = ctx.storage.get_movie(&code).await else {
                return answer_cb(&bot, &q, "❌ Not found!", true).await;
            };
            if movie.file_for(part, quality).is_none() {
                return answer_cb(&bot, &q, "❌ File not available!", true).await;
            }
            send_download_link(&bot, chat_id, message_id, user_id, &movie, part, quality, ctx)
                .await?;
            answer_cb(&bot, &q, "✅ Link ready!", false).await?;
        }
    }
    Ok(())
}

/* ====== Selection menus ====== */

async fn send_parts_menu(
    bot: &Bot,
    chat: ChatId,
    message_id: Option<MessageId>,
    movie: &Movie,
) -> ResponseResult<()> {
    let buttons: Vec<InlineKeyboardButton> = (1..=movie.parts())
        .map(|i| {
            InlineKeyboardButton::callback(
                format!("📦 Part {i}"),
                Callback::Part { code: movie.code.clone(), part: i }.encode(),
            )
        })
        .collect();
    let rows: Vec<Vec<InlineKeyboardButton>> = buttons.chunks(3).map(<[_]>::to_vec).collect();

    let text = format!(
        "🎬 <b>{}</b>\n\nThis movie has {} parts.\nSelect one:",
        html_escape(&movie.title),
        movie.parts()
    );
    respond(bot, chat, message_id, text, Some(InlineKeyboardMarkup::new(rows))).await
}

async fn send_quality_menu(
    bot: &Bot,
    chat: ChatId,
    message_id: Option<MessageId>,
    movie: &Movie,
    part: u32,
) -> ResponseResult<()> {
    let qualities = movie.qualities_for_part(part);
    if qualities.is_empty() {
        let text = format!(
            "❌ No files available for <b>{}</b> Part {}",
            html_escape(&movie.title),
            part
        );
        return respond(bot, chat, message_id, text, None).await;
    }

    let mut rows: Vec<Vec<InlineKeyboardButton>> = qualities
        .iter()
        .map(|(quality, entry)| {
            let label = if entry.size.is_empty() {
                format!("🎞️ {quality}")
            } else {
                format!("🎞️ {quality} ({})", entry.size)
            };
            vec![InlineKeyboardButton::callback(
                label,
                Callback::Quality { code: movie.code.clone(), part, quality: *quality }.encode(),
            )]
        })
        .collect();
    if movie.parts() > 1 {
        rows.push(vec![InlineKeyboardButton::callback(
            "◀️ Back to Parts".to_string(),
            Callback::Movie { code: movie.code.clone() }.encode(),
        )]);
    }

    let text = format!(
        "🎬 <b>{}</b>\n\n📦 Part: {}\n\nSelect quality:",
        html_escape(&movie.title),
        part
    );
    respond(bot, chat, message_id, text, Some(InlineKeyboardMarkup::new(rows))).await
}

/// Issue a token and show the "get file" button (ad page or direct deep link).
#[allow(clippy::too_many_arguments)]
async fn send_download_link(
    bot: &Bot,
    chat: ChatId,
    message_id: Option<MessageId>,
    user_id: u64,
    movie: &Movie,
    part: u32,
    quality: Quality,
    ctx: &Ctx,
) -> ResponseResult<()> {
    let token = ctx
        .storage
        .create_token(user_id, &movie.code, part, quality)
        .await
        .map_err(to_req_err)?;

    let size = movie.size_label(part, quality);
    let link = monetize::download_link(
        &ctx.cfg.monetize,
        &ctx.bot_username,
        &token,
        &LinkMeta { title: &movie.title, part, quality, size: &size },
    );
    let btn_text = if ctx.cfg.monetize.is_active() {
        "✅ Verify & Get File"
    } else {
        "📥 Get File"
    };
    let back = if movie.parts() > 1 {
        InlineKeyboardButton::callback(
            "◀️ Back to Parts".to_string(),
            Callback::Movie { code: movie.code.clone() }.encode(),
        )
    } else {
        InlineKeyboardButton::callback(
            "◀️ Back".to_string(),
            Callback::BackToQualities { code: movie.code.clone(), part }.encode(),
        )
    };
    let kb = InlineKeyboardMarkup::new([
        vec![InlineKeyboardButton::url(btn_text.to_string(), link.parse().map_err(to_req_err)?)],
        vec![back],
    ]);

    let size_text = if size.is_empty() { String::new() } else { format!("\n📁 Size: {size}") };
    let text = format!(
        "✅ <b>{}</b>\n\n📦 Part: {}\n🎞️ Quality: {}{}\n\n👇 Click to get your file:",
        html_escape(&movie.title),
        part,
        quality,
        size_text
    );
    respond(bot, chat, message_id, text, Some(kb)).await
}

/* ====== Token redemption & delivery ====== */

async fn redeem_and_deliver(
    bot: &Bot,
    chat: ChatId,
    user_id: u64,
    token: &str,
    ctx: &Ctx,
) -> ResponseResult<()> {
    // membership failure must not consume the token
    if !check_subscription(bot, ctx.cfg.channel_id, user_id).await {
        return send_subscribe_prompt(bot, chat, &format!("token_{token}"), ctx).await;
    }

    let status = bot
        .send_message(chat, "⏳ <b>Verifying your request...</b>")
        .parse_mode(ParseMode::Html)
        .await?;

    let binding = match ctx.storage.redeem_token(token, user_id).await.map_err(to_req_err)? {
        Ok(binding) => binding,
        Err(e) => {
            let text = match e {
                GateError::NotFound | GateError::AlreadyUsed => {
                    "❌ <b>Link expired or already used!</b>\n\n\
                     Please search for the movie again and get a new link."
                }
                GateError::Unauthorized => {
                    "❌ <b>This link belongs to another user!</b>\n\n\
                     Please search for the movie yourself to get your own link."
                }
                GateError::Unavailable => "❌ <b>File not available!</b> Please try again.",
            };
            bot.edit_message_text(chat, status.id, text).parse_mode(ParseMode::Html).await?;
            return Ok(());
        }
    };

    let Some(movie) = ctx.storage.get_movie(&binding.movie_code).await else {
        bot.edit_message_text(chat, status.id, "❌ <b>Movie not found!</b> It may have been removed.")
            .parse_mode(ParseMode::Html)
            .await?;
        return Ok(());
    };
    let Some(file) = movie.file_for(binding.part, binding.quality) else {
        bot.edit_message_text(
            chat,
            status.id,
            "❌ <b>File not available!</b> Please try searching again.",
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    };

    bot.edit_message_text(chat, status.id, "📤 <b>Sending your file...</b>")
        .parse_mode(ParseMode::Html)
        .await?;
    deliver_file(bot, chat, status.id, &movie, binding.part, binding.quality, &file, user_id)
        .await
}

/// Cached media first, one retry as a document, then a final error message.
#[allow(clippy::too_many_arguments)]
async fn deliver_file(
    bot: &Bot,
    chat: ChatId,
    status_id: MessageId,
    movie: &Movie,
    part: u32,
    quality: Quality,
    file: &FileEntry,
    user_id: u64,
) -> ResponseResult<()> {
    let size_text =
        if file.size.is_empty() { String::new() } else { format!("\n📁 Size: {}", file.size) };
    let caption = clip(
        &format!(
            "🎬 <b>{}</b>\n\n📦 Part: {}\n🎞️ Quality: {}{}\n\n✅ Enjoy your movie!",
            html_escape(&movie.title),
            part,
            quality,
            size_text
        ),
        1024,
    );

    let as_video = bot
        .send_video(chat, InputFile::file_id(FileId(file.file_id.clone())))
        .caption(caption.clone())
        .parse_mode(ParseMode::Html)
        .await;
    match as_video {
        Ok(_) => {
            bot.delete_message(chat, status_id).await?;
            info!(user_id, movie = %movie.code, part, %quality, "file sent");
        }
        Err(e) => {
            warn!(error = %e, "send_video failed, retrying as document");
            let as_doc = bot
                .send_document(chat, InputFile::file_id(FileId(file.file_id.clone())))
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .await;
            match as_doc {
                Ok(_) => {
                    bot.delete_message(chat, status_id).await?;
                    info!(user_id, movie = %movie.code, "file sent as document");
                }
                Err(e2) => {
                    warn!(error = %e2, "document fallback failed");
                    bot.edit_message_text(
                        chat,
                        status_id,
                        "❌ <b>Error sending file!</b>\n\nPlease try again or contact admin.",
                    )
                    .parse_mode(ParseMode::Html)
                    .await?;
                }
            }
        }
    }
    Ok(())
}

/* ====== Channel membership ====== */

/// Derived per request, never stored. Transport errors count as "not a member".
async fn check_subscription(bot: &Bot, channel_id: i64, user_id: u64) -> bool {
    match bot.get_chat_member(ChatId(channel_id), UserId(user_id)).await {
        Ok(member) => member.is_present(),
        Err(e) => {
            warn!(error = %e, user_id, "get_chat_member failed");
            false
        }
    }
}

/* ====== Admin: catalog maintenance ====== */

/// file_id + byte size from the replied-to video or document.
fn replied_file(msg: &Message) -> Option<(String, u32)> {
    let replied = msg.reply_to_message()?;
    if let Some(v) = replied.video() {
        return Some((v.file.id.0.clone(), v.file.size));
    }
    if let Some(d) = replied.document() {
        return Some((d.file.id.0.clone(), d.file.size));
    }
    None
}

fn split_fields(text: &str) -> Vec<&str> {
    text.split('|').map(str::trim).collect()
}

fn quality_options() -> String {
    Quality::ALL.map(|q| q.label()).join(", ")
}

async fn on_add(bot: &Bot, msg: &Message, args: &str, ctx: &Ctx) -> ResponseResult<()> {
    let Some((file_id, bytes)) = replied_file(msg) else {
        bot.send_message(
            msg.chat.id,
            format!(
                "📥 <b>How to add a movie:</b>\n\n1️⃣ Send/forward a video file\n\
                 2️⃣ Reply to it with:\n\n<code>/add Movie Name | quality</code>\n\n\
                 <b>Available qualities:</b>\n{}",
                quality_options()
            ),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    };

    let fields = split_fields(args);
    let (title, quality) = match fields.as_slice() {
        [title, quality] if !title.is_empty() => (*title, *quality),
        _ => {
            bot.send_message(
                msg.chat.id,
                "❌ Format: <code>/add Movie Name | quality</code>\n\
                 Example: <code>/add Dune 2021 | 720p</code>",
            )
            .parse_mode(ParseMode::Html)
            .await?;
            return Ok(());
        }
    };
    let Ok(quality) = quality.parse::<Quality>() else {
        bot.send_message(
            msg.chat.id,
            format!("❌ Invalid quality. <b>Available:</b> {}", quality_options()),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    };

    let code = catalog::slug(title);
    let size = size_label(bytes);
    let entry = FileEntry { file_id, size: size.clone() };

    let (mut movie, existed) = match ctx.storage.get_movie(&code).await {
        Some(m) => (m, true),
        None => (Movie::new_flat(code.clone(), title.to_string()), false),
    };
    movie.add_quality(quality, entry);
    let summary = movie.quality_summary(1);
    ctx.storage.upsert_movie(movie).await.map_err(to_req_err)?;

    let headline = if existed { "Quality added!" } else { "Movie added!" };
    bot.send_message(
        msg.chat.id,
        format!(
            "✅ <b>{headline}</b>\n\n📽️ <b>Title:</b> {}\n🔑 <b>Code:</b> <code>{code}</code>\n\
             🎞️ <b>New quality:</b> {quality} ({size})\n📦 <b>All qualities:</b> {summary}",
            html_escape(title)
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

async fn on_addpart(bot: &Bot, msg: &Message, args: &str, ctx: &Ctx) -> ResponseResult<()> {
    let Some((file_id, bytes)) = replied_file(msg) else {
        bot.send_message(
            msg.chat.id,
            "📥 <b>How to add a part:</b>\n\n1️⃣ Send/forward the part's video\n\
             2️⃣ Reply to it with:\n\n<code>/addpart Movie Name | part_number | quality</code>",
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    };

    let fields = split_fields(args);
    let (title, part, quality) = match fields.as_slice() {
        [title, part, quality] if !title.is_empty() => (*title, *part, *quality),
        _ => {
            bot.send_message(
                msg.chat.id,
                "❌ Format: <code>/addpart Movie Name | part_number | quality</code>",
            )
            .parse_mode(ParseMode::Html)
            .await?;
            return Ok(());
        }
    };
    let Ok(part) = part.parse::<u32>() else {
        bot.send_message(msg.chat.id, "❌ Part number must be a number!").await?;
        return Ok(());
    };
    if part == 0 {
        bot.send_message(msg.chat.id, "❌ Part numbers start at 1!").await?;
        return Ok(());
    }
    let Ok(quality) = quality.parse::<Quality>() else {
        bot.send_message(
            msg.chat.id,
            format!("❌ Invalid quality. <b>Available:</b> {}", quality_options()),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    };

    let code = catalog::slug(title);
    let size = size_label(bytes);
    let mut movie = ctx
        .storage
        .get_movie(&code)
        .await
        .unwrap_or_else(|| Movie::new_flat(code.clone(), title.to_string()));
    movie.add_part_quality(part, quality, FileEntry { file_id, size: size.clone() });
    let total_parts = movie.parts();
    let summary = movie.quality_summary(part);
    ctx.storage.upsert_movie(movie).await.map_err(to_req_err)?;

    bot.send_message(
        msg.chat.id,
        format!(
            "✅ <b>Part {part} added!</b>\n\n📽️ <b>Movie:</b> {}\n\
             🎞️ <b>Quality:</b> {quality} ({size})\n📦 <b>Total parts:</b> {total_parts}\n\
             🎞️ <b>Part {part} qualities:</b> {summary}",
            html_escape(title)
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

async fn on_delete(bot: &Bot, msg: &Message, args: &str, ctx: &Ctx) -> ResponseResult<()> {
    if args.trim().is_empty() {
        bot.send_message(
            msg.chat.id,
            "❌ <b>How to delete:</b>\n\n<code>/delete Movie Name</code>\n\
             <code>/delete Movie Name | quality</code>\n\
             <code>/delete Movie Name | part | quality</code>",
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    }

    let fields = split_fields(args);
    let (title, part, quality) = match fields.as_slice() {
        [title] => {
            let code = catalog::slug(title);
            let removed = ctx.storage.delete_movie(&code).await.map_err(to_req_err)?;
            let escaped = html_escape(title);
            let text = if removed {
                format!("✅ <code>{escaped}</code> deleted!")
            } else {
                format!("❌ <code>{escaped}</code> not found!")
            };
            bot.send_message(msg.chat.id, text).parse_mode(ParseMode::Html).await?;
            return Ok(());
        }
        [title, quality] => (*title, 1u32, *quality),
        [title, part, quality] => match part.parse::<u32>() {
            Ok(p) => (*title, p, *quality),
            Err(_) => {
                bot.send_message(msg.chat.id, "❌ Part number must be a number!").await?;
                return Ok(());
            }
        },
        _ => {
            bot.send_message(msg.chat.id, "❌ Too many fields!").await?;
            return Ok(());
        }
    };
    let Ok(quality) = quality.parse::<Quality>() else {
        bot.send_message(
            msg.chat.id,
            format!("❌ Invalid quality. <b>Available:</b> {}", quality_options()),
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    };

    let code = catalog::slug(title);
    let Some(mut movie) = ctx.storage.get_movie(&code).await else {
        bot.send_message(msg.chat.id, format!("❌ <code>{}</code> not found!", html_escape(title)))
            .parse_mode(ParseMode::Html)
            .await?;
        return Ok(());
    };

    if !movie.remove_quality(part, quality) {
        bot.send_message(msg.chat.id, format!("❌ Quality <code>{quality}</code> not found!"))
            .parse_mode(ParseMode::Html)
            .await?;
        return Ok(());
    }

    // removing the last file removes the movie
    if movie.is_empty() {
        ctx.storage.delete_movie(&code).await.map_err(to_req_err)?;
        bot.send_message(
            msg.chat.id,
            format!("✅ <code>{}</code> deleted (no files left)!", html_escape(title)),
        )
        .parse_mode(ParseMode::Html)
        .await?;
    } else {
        let remaining = movie.quality_summary(part);
        ctx.storage.upsert_movie(movie).await.map_err(to_req_err)?;
        bot.send_message(
            msg.chat.id,
            format!(
                "✅ <b>Quality {quality} removed from <code>{}</code>!</b>\n\nRemaining: {remaining}",
                html_escape(title)
            ),
        )
        .parse_mode(ParseMode::Html)
        .await?;
    }
    Ok(())
}

async fn on_list(bot: &Bot, msg: &Message, ctx: &Ctx) -> ResponseResult<()> {
    let movies = ctx.storage.all_movies().await;
    if movies.is_empty() {
        bot.send_message(msg.chat.id, "📭 No movies yet!").await?;
        return Ok(());
    }

    let mut text = "📽️ <b>All movies:</b>\n\n".to_string();
    for (i, m) in movies.iter().take(50).enumerate() {
        let parts_text =
            if m.parts() > 1 { format!(" ({} parts)", m.parts()) } else { String::new() };
        let qualities = m.quality_summary(1);
        text.push_str(&format!(
            "{}. <b>{}</b>{}\n   Code: <code>{}</code>\n   Qualities: {}\n\n",
            i + 1,
            html_escape(&m.title),
            parts_text,
            m.code,
            if qualities.is_empty() { "—" } else { &qualities },
        ));
    }
    if movies.len() > 50 {
        text.push_str(&format!("<i>...and {} more</i>", movies.len() - 50));
    }
    bot.send_message(msg.chat.id, text).parse_mode(ParseMode::Html).await?;
    Ok(())
}

async fn on_stats(bot: &Bot, msg: &Message, ctx: &Ctx) -> ResponseResult<()> {
    let users = ctx.storage.user_count().await;
    let movies = ctx.storage.all_movies().await;
    let files: usize = movies.iter().map(Movie::file_count).sum();

    bot.send_message(
        msg.chat.id,
        format!(
            "📊 <b>Bot statistics</b>\n\n👥 Users: {users}\n🎬 Movies: {}\n🎞️ Total files: {files}",
            movies.len()
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

async fn on_broadcast(bot: &Bot, msg: &Message, ctx: &Ctx) -> ResponseResult<()> {
    let Some(reply) = msg.reply_to_message() else {
        bot.send_message(msg.chat.id, "❌ Reply to a message to broadcast!").await?;
        return Ok(());
    };

    let status = bot.send_message(msg.chat.id, "📢 Broadcasting...").await?;
    let (mut sent, mut failed) = (0u32, 0u32);
    for user_id in ctx.storage.all_user_ids().await {
        match bot.copy_message(ChatId(user_id as i64), msg.chat.id, reply.id).await {
            Ok(_) => sent += 1,
            Err(e) => {
                warn!(error = %e, user_id, "broadcast copy failed");
                failed += 1;
            }
        }
    }
    bot.edit_message_text(
        msg.chat.id,
        status.id,
        format!("📢 <b>Done!</b>\n\n✅ Sent: {sent}\n❌ Failed: {failed}"),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

/* ====== Helpers ====== */

/// Edit the originating message when we have one, otherwise send a new one.
async fn respond(
    bot: &Bot,
    chat: ChatId,
    message_id: Option<MessageId>,
    text: String,
    kb: Option<InlineKeyboardMarkup>,
) -> ResponseResult<()> {
    match message_id {
        Some(id) => {
            let req = bot.edit_message_text(chat, id, text).parse_mode(ParseMode::Html);
            match kb {
                Some(kb) => req.reply_markup(kb).await?,
                None => req.await?,
            };
        }
        None => {
            let req = bot.send_message(chat, text).parse_mode(ParseMode::Html);
            match kb {
                Some(kb) => req.reply_markup(kb).await?,
                None => req.await?,
            };
        }
    }
    Ok(())
}

async fn answer_cb(bot: &Bot, q: &CallbackQuery, text: &str, alert: bool) -> ResponseResult<()> {
    let mut req = bot.answer_callback_query(q.id.clone());
    if !text.is_empty() {
        req = req.text(text).show_alert(alert);
    }
    req.await?;
    Ok(())
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Cut at `max` grapheme clusters with an ellipsis.
fn clip(s: &str, max: usize) -> String {
    let mut graphemes = s.graphemes(true);
    let head: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        head + "…"
    } else {
        head
    }
}

/// "703.12 MB" / "1.37 GB" from a byte count; empty when unknown.
fn size_label(bytes: u32) -> String {
    if bytes == 0 {
        return String::new();
    }
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb < 1024.0 {
        format!("{mb:.2} MB")
    } else {
        format!("{:.2} GB", mb / 1024.0)
    }
}

/// Poster download by bytes, robust against CDN redirects.
async fn fetch_image(url: &str) -> Result<Vec<u8>, teloxide::RequestError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .user_agent("Mozilla/5.0 (compatible; tg-bot/1.0)")
        .build()
        .map_err(to_req_err)?;
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, "image/*")
        .send()
        .await
        .map_err(to_req_err)?;
    if !resp.status().is_success() {
        return Err(to_req_err(format!("status {}", resp.status())));
    }
    if let Some(ct) = resp.headers().get(reqwest::header::CONTENT_TYPE) {
        let ct = ct.to_str().unwrap_or("");
        if !ct.starts_with("image/") {
            return Err(to_req_err(format!("unexpected content-type: {ct}")));
        }
    }
    let bytes = resp.bytes().await.map_err(to_req_err)?;
    Ok(bytes.to_vec())
}

fn to_req_err<E: std::fmt::Display>(e: E) -> teloxide::RequestError {
    teloxide::RequestError::Io(std::sync::Arc::new(std::io::Error::new(
        std::io::ErrorKind::Other,
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_label_picks_unit() {
        assert_eq!(size_label(0), "");
        assert_eq!(size_label(700 * 1024 * 1024), "700.00 MB");
        assert_eq!(size_label(1536 * 1024 * 1024), "1.50 GB");
    }

    #[test]
    fn clip_counts_graphemes() {
        assert_eq!(clip("abcdef", 10), "abcdef");
        assert_eq!(clip("abcdef", 3), "abc…");
        // family emoji is one grapheme cluster
        assert_eq!(clip("👨‍👩‍👧x", 1), "👨‍👩‍👧…");
    }

    #[test]
    fn admin_field_splitting() {
        assert_eq!(split_fields("Dune 2021 | 720p"), vec!["Dune 2021", "720p"]);
        assert_eq!(split_fields("Kill Bill | 2 | 4K"), vec!["Kill Bill", "2", "4K"]);
        assert_eq!(split_fields("Just A Name"), vec!["Just A Name"]);
    }

    #[test]
    fn controller_payloads_match_blocked_words() {
        let blocked = |payload: &str| {
            let lowered = payload.to_lowercase();
            BLOCKED_PAYLOAD_WORDS.iter().any(|w| lowered.contains(w))
        };
        assert!(blocked("setup_controller"));
        assert!(blocked("Admin_Panel"));
        assert!(!blocked("token_abc123"));
        assert!(!blocked("ZHVuZV8yMDIxOjE"));
    }
}
